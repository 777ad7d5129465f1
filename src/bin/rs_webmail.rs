use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use rs_webmail::config::ConfigStore;
use rs_webmail::mail::imap_client::ImapClient;
use rs_webmail::mail::smtp_client::SmtpSender;
use rs_webmail::web::handlers::App;
use rs_webmail::web::server::serve;

#[derive(Parser)]
#[command(name = "rs_webmail")]
#[command(about = "Send and read mail through a small web interface", long_about = None)]
struct Cli {
    /// Address the web server listens on
    #[arg(long, env = "RS_WEBMAIL_BIND", default_value = "0.0.0.0:5000")]
    bind: String,

    /// JSON file holding SMTP servers and contacts
    #[arg(long, env = "RS_WEBMAIL_CONFIG", default_value = "config.json")]
    config: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let store = ConfigStore::new(cli.config);
    if store.load().is_none() {
        log::warn!(
            "no usable configuration at {}; add a server on /manage",
            store.path().display()
        );
    }

    let app = App::new(store, SmtpSender, ImapClient);
    serve(&app, &cli.bind)
}
