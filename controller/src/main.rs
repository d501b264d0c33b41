mod driver;
mod host;
mod notify;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
