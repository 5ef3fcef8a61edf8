use std::io::{self, IsTerminal, Write};

use tokio::runtime::Builder;

use super::args::Args;
use crate::config::{get_config, set_config, Config};
use crate::errors::ShimError;

/// Build the effective configuration: defaults, then the optional TOML
/// file, then command-line overrides. Installs the result globally.
pub fn init_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(path) = &args.config_file {
        // A throwaway runtime so the async parser can run (and report
        // errors) before the real runtime and logger exist.
        let runtime = Builder::new_multi_thread().worker_threads(1).build()?;
        let path = path.clone();
        runtime.block_on(async move {
            if let Err(err) = crate::config::parse(&path).await {
                let stdin = io::stdin();
                if stdin.is_terminal() {
                    eprintln!("Config parse error: {err}");
                    io::stdout().flush().ok();
                }
                std::process::exit(exitcode::CONFIG);
            }
        });
    }

    let mut config = get_config();
    apply_args(args, &mut config);
    config.validate().map_err(|err: ShimError| Box::new(err) as Box<dyn std::error::Error>)?;
    set_config(config.clone());
    Ok(config)
}

fn apply_args(args: &Args, config: &mut Config) {
    if let Some(ports) = &args.ports {
        config.general.ports = ports.clone();
    }
    if let Some(document_root) = &args.document_root {
        config.general.document_root = document_root.clone();
    }
    if let Some(scidb_host) = &args.scidb_host {
        config.general.scidb_host = scidb_host.clone();
    }
    if let Some(scidb_port) = args.scidb_port {
        config.general.scidb_port = scidb_port;
    }
    if let Some(tmp_dir) = &args.tmp_dir {
        config.general.tmp_dir = tmp_dir.clone();
    }
    if let Some(max_sessions) = args.max_sessions {
        config.general.max_sessions = max_sessions;
    }
    if let Some(timeout) = args.timeout {
        config.general.session_timeout = timeout;
    }
    if let Some(save_instance_id) = args.save_instance_id {
        config.general.save_instance_id = save_instance_id;
    }
    if args.aio {
        config.general.use_aio = true;
    }
}
