use shim::app;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() {
    let args = app::parse();

    let config = match app::init_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = app::init_logging(&args, &config) {
        eprintln!("Logging initialization error: {err}");
        std::process::exit(1);
    }

    if let Err(err) = app::run_server(args, config) {
        log::error!("Fatal: {err}");
        std::process::exit(1);
    }

    std::process::exit(exitcode::OK);
}
