use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

mod args;
mod auth;
mod backend;
mod board;
mod feedback;
mod forms;
mod pages;
mod routes;
mod session;
mod user;

use args::Args;
use backend::Backend;
use board::Board;
use routes::Ctx;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();

    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let backend = match Backend::new(args.data_dir()).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("couldn't open database in {:?}: {e}", args.data_dir());
            return ExitCode::FAILURE;
        }
    };

    let ctx = Ctx::new(Board::new(backend), args.secure());

    info!("listening on {addr}");
    warp::serve(routes::routes(ctx)).run(addr).await;

    ExitCode::SUCCESS
}
