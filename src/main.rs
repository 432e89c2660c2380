use clap::App;
use clap::Arg;

use tokio::sync::broadcast;

#[tokio::main(flavor = "multi_thread", worker_threads = 3)]
async fn main() {
    let matches = App::new("Quorum")
        .version("0.1.0")
        .about("Replicated named values over Raft consensus.")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("PATH")
                .required(true)
                .default_value("Config.toml")
                .help("Location of the config file."),
        )
        .get_matches();

    let config_path = matches.value_of("config").unwrap();
    let config = quorum_raft::config::from_path(config_path).unwrap();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let interrupt = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = interrupt.send(());
    });

    quorum::run(config, (shutdown_tx, shutdown_rx)).await.unwrap();
}
