use env_logger::{Builder, Env};
use log::error;

fn init_logger() {
    // RUST_LOG, иначе info. Пример: RUST_LOG=debug simpledb serve --port 20080
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = SimpleDB::cli::run() {
        error!("{:?}", e);
        std::process::exit(1);
    }
}
