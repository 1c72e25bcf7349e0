use clap::Parser;

pub mod browser;
pub mod commands;
pub mod core;
pub mod models;
pub mod pipeline;
pub mod platforms;
pub mod storage;

#[cfg(test)]
mod testing;

/// Parses arguments, loads settings, installs logging and runs the chosen
/// command. Returns the process exit code.
pub fn run() -> i32 {
    let cli = commands::Cli::parse();

    let settings_path = cli.global.settings_path();
    let mut settings = match storage::config::load_settings(&settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("clubget: {:#}", e);
            return 2;
        }
    };
    cli.global.apply(&mut settings);

    match core::logging::init(&settings.logging, cli.global.verbose) {
        Ok(Some(path)) => tracing::debug!("[log] writing {}", path.display()),
        Ok(None) => {}
        Err(e) => eprintln!("clubget: file logging unavailable: {:#}", e),
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("clubget: failed to start runtime: {}", e);
            return 2;
        }
    };

    match runtime.block_on(commands::dispatch(cli, settings)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("clubget: {:#}", e);
            1
        }
    }
}
