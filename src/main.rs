#[tokio::main]
async fn main() -> anyhow::Result<()> {
    glucoflow::run().await
}
