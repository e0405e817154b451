use aurademo_agent::DemoSession;
use aurademo_browser::redact;
use aurademo_core::{InMemoryProductRegistry, Paths};
use aurademo_realtime::{DeltaKind, TranscriptListener};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Prints the AI's transcript as it streams in.
struct ConsoleTranscript;

impl TranscriptListener for ConsoleTranscript {
    fn on_delta(&self, kind: DeltaKind, text: &str) {
        // No speaker output in the console
        if kind == DeltaKind::Audio {
            return;
        }
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{}", redact(text));
        let _ = out.flush();
    }

    fn on_response_done(&self) {
        println!();
    }
}

pub async fn run(product: Option<String>, headed: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = super::load_config(&paths)?;
    if headed {
        config.browser.headed = true;
    }

    let registry = InMemoryProductRegistry::new(config.products.clone());
    let backend = super::browser_backend(&config, &paths, "cli");
    let mut session =
        DemoSession::new(config, backend).with_transcript_listener(Arc::new(ConsoleTranscript));
    if let Some(product_id) = product {
        session = session.with_product(&registry, &product_id).await?;
    }

    session.start().await?;
    println!("Session {} active. Type to talk to Aura, Ctrl-C to end.", session.id());

    let sender = session.sender();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, ending session");
                break;
            }
            _ = session.wait_closed() => {
                info!("Realtime connection closed");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(text)) => {
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    if let Some(sender) = &sender {
                        if let Err(e) = sender.send_text(text).await {
                            warn!(error = %e, "Failed to send text input");
                        }
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Stdin read error");
                    stdin_open = false;
                }
            }
        }
    }

    session.stop().await;
    Ok(())
}
