#[tokio::main]
async fn main() -> anyhow::Result<()> {
    parley_server::run().await
}
