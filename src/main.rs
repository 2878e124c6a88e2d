// live-sessions-service/src/main.rs
use anyhow::Result;
use live_sessions_service::app::App;

#[tokio::main]
async fn main() -> Result<()> {
    App::bootstrap().await?.run().await
}
