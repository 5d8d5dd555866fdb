#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = quiz_live::run().await {
        eprintln!("quiz-live fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
