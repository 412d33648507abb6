use clap::Parser;
use log::error;
use naive_storage::{Config, NaiveStorage};

fn main() {
    env_logger::init();
    let config = Config::parse();
    match NaiveStorage::open(&config) {
        Ok(db) => {
            println!(
                "database server ready: {} buffers, {} available",
                db.pool().num_buffers(),
                db.pool().available_count()
            );
        }
        Err(err) => {
            error!("startup failed: {}", err);
            println!("Error: {}", err);
            std::process::exit(1);
        }
    }
}
