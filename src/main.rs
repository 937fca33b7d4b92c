use referral_server::{app::Application, config::get_configuration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = get_configuration()?;
    Application::build(config).await?;
    Ok(())
}
