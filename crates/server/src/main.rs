#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mend_server::run().await
}
