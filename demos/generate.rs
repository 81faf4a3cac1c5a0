//! Generate images from the command line using `settings.json`.
//!
//! Reads endpoint, key and defaults from `./settings.json`, then fans the
//! prompt out into `num` images and saves each one as it arrives.
//!
//! ```sh
//! DALLE_LOG=debug cargo run --example generate -- "a lighthouse at dusk"
//! ```

use dalle_queue::{init_logging, GenerationRequest, Generator, Settings, UnitEvent};
use std::path::Path;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("info")?;

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let settings = Settings::load(Path::new("./settings.json"))?;
    let config = settings.client_config()?;

    let mut form = settings.form();
    form.prompt = prompt;
    let request = GenerationRequest::from_form(&form)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let generator = Generator::from_config(&config)?.with_events(tx);
    let batch = generator.generate(request);
    println!("Batch {}: {} image(s)", batch.id(), batch.len());

    let mut remaining = batch.len();
    while remaining > 0 {
        let Some(event) = rx.recv().await else { break };
        match event {
            UnitEvent::Progress { unit_id, state } => println!("  {} {:?}", unit_id, state),
            UnitEvent::Delivered { unit_id, artifact } => {
                remaining -= 1;
                match artifact.save() {
                    Ok(()) => println!("  {} saved to {}", unit_id, artifact.path.display()),
                    Err(e) => eprintln!("  {} could not be saved: {}", unit_id, e),
                }
                println!("  revised prompt: {}", artifact.revised_prompt);
            }
            UnitEvent::Failed { unit_id, reason, .. } => {
                remaining -= 1;
                eprintln!("  {} failed: {}", unit_id, reason);
            }
        }
    }

    batch.wait().await;
    generator.shutdown();
    Ok(())
}
