#[tokio::main]
async fn main() -> eyre::Result<()> {
    forq::run().start().await
}
