#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    mailspool_observability::init();

    let config = mailspool_infra::Config::from_env()?;
    mailspool_server::run(config).await
}
