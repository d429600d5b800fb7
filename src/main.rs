use clap::Parser;
use drive_refresh_token::{cli::Cli, flow::InstalledFlow};

fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut cli = Cli::parse();
    // Without a client secret only the usage line is printed; `.env` stays unread.
    if cli.client_secret.is_some() && dotenv::dotenv().is_ok() {
        cli = Cli::parse();
    }
    let flow = InstalledFlow::new(cli.flow_options());
    cli.execute(&flow, &mut std::io::stdout().lock())
}
