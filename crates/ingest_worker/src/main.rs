use ingest_worker_lib::{cli::parse_args, commands::run_service};

#[tokio::main]
async fn main() {
    let args = parse_args();
    let code = run_service(args).await;
    std::process::exit(code);
}
