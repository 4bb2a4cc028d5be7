//! x11core - Main entry point
//!
//! Runs the protocol core as a headless X server.

use std::env;
use std::process;
use std::sync::Arc;
use std::thread;

use x11core::backend::{self, NullBackend};
use x11core::connection::Listener;
use x11core::server::listener::{serve, SharedServer};
use x11core::{SecurityPolicy, Server, VERSION};

fn print_usage() {
    println!("x11core v{}", VERSION);
    println!("Headless X11 protocol server");
    println!();
    println!("Usage: x11core [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -display <n>          Display number (default: 1)");
    println!("  -backend <type>       Backend type (default: null)");
    println!("  -screen <WxH>         Screen size in pixels (default: 1920x1080)");
    println!("  -tcp                  Listen on TCP (port 6000 + display)");
    println!("  -unix                 Listen on Unix socket (default on Unix)");
    println!("  -security <level>     Security level: permissive, default, strict");
    println!("  -list-backends        List available backends");
    println!("  -h, --help            Show this help message");
    println!();
    println!("Examples:");
    println!("  x11core -display 1");
    println!("  x11core -display 2 -tcp -screen 1280x800 -security strict");
    println!();
}

fn list_backends() {
    println!("Available backends:");
    for backend in backend::available_backends() {
        println!("  - {}", backend);
    }
}

#[derive(Debug)]
struct Config {
    display: u16,
    backend_type: String,
    screen: Option<(u16, u16)>,
    listen_tcp: bool,
    listen_unix: bool,
    security: SecurityPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            display: 1,
            backend_type: "null".to_string(),
            screen: None,
            #[cfg(unix)]
            listen_tcp: false,
            #[cfg(not(unix))]
            listen_tcp: true,
            #[cfg(unix)]
            listen_unix: true,
            #[cfg(not(unix))]
            listen_unix: false,
            security: SecurityPolicy::default(),
        }
    }
}

fn parse_screen(value: &str) -> Result<(u16, u16), String> {
    let invalid = || format!("Invalid screen size: {}", value);
    let (w, h) = value.split_once('x').ok_or_else(invalid)?;
    let width: u16 = w.parse().map_err(|_| invalid())?;
    let height: u16 = h.parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

fn parse_args() -> Result<Config, String> {
    let mut config = Config::default();
    let args: Vec<String> = env::args().collect();
    let mut explicit_listener = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-list-backends" => {
                list_backends();
                process::exit(0);
            }
            "-display" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for -display".to_string());
                }
                config.display = args[i]
                    .parse()
                    .map_err(|_| "Invalid display number".to_string())?;
            }
            "-backend" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for -backend".to_string());
                }
                config.backend_type = args[i].clone();
            }
            "-screen" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for -screen".to_string());
                }
                config.screen = Some(parse_screen(&args[i])?);
            }
            "-tcp" | "-unix" => {
                // Naming a transport replaces the platform default
                if !explicit_listener {
                    config.listen_tcp = false;
                    config.listen_unix = false;
                    explicit_listener = true;
                }
                if args[i] == "-tcp" {
                    config.listen_tcp = true;
                } else {
                    config.listen_unix = true;
                }
            }
            "-security" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for -security".to_string());
                }
                config.security = SecurityPolicy::from_name(&args[i])
                    .ok_or_else(|| format!("Invalid security level: {}", args[i]))?;
            }
            arg => {
                return Err(format!("Unknown option: {}", arg));
            }
        }
        i += 1;
    }

    Ok(config)
}

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}", err);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    let backend: Box<dyn backend::Backend> = match (config.backend_type.as_str(), config.screen) {
        ("null", Some((width, height))) => Box::new(NullBackend::with_screen_size(width, height)),
        (name, _) => match backend::create_backend(name) {
            Some(backend) => backend,
            None => {
                eprintln!("Error: Backend '{}' is not available", name);
                eprintln!();
                list_backends();
                process::exit(1);
            }
        },
    };

    log::info!("x11core v{}", VERSION);
    log::info!("Display: :{}", config.display);
    log::info!("Backend: {}", config.backend_type);
    log::info!(
        "Security policy: pointer_grabs={}, keyboard_grabs={}, synthetic_events={}, max_resources={}",
        config.security.allow_pointer_grabs,
        config.security.allow_keyboard_grabs,
        config.security.allow_synthetic_events,
        config.security.max_resources_per_client
    );

    let server = match Server::new(backend, config.security.clone()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: Failed to initialize server: {}", e);
            process::exit(1);
        }
    };
    let shared = SharedServer::new(server);

    let mut listeners = Vec::new();
    if config.listen_tcp {
        let port = 6000 + config.display;
        match Listener::tcp(port) {
            Ok(listener) => {
                log::info!("Listening on TCP port {}", port);
                listeners.push(listener);
            }
            Err(e) => {
                eprintln!("Error: Failed to start TCP listener: {}", e);
                process::exit(1);
            }
        }
    }

    if config.listen_unix {
        #[cfg(unix)]
        {
            let dir = "/tmp/.X11-unix";
            let _ = std::fs::create_dir_all(dir);
            let path = format!("{}/X{}", dir, config.display);
            match Listener::unix(&path) {
                Ok(listener) => {
                    log::info!("Listening on {}", path);
                    listeners.push(listener);
                }
                Err(e) => {
                    eprintln!("Error: Failed to start Unix listener: {}", e);
                    process::exit(1);
                }
            }
        }
        #[cfg(not(unix))]
        log::warn!("Unix sockets are not available on this platform");
    }

    if listeners.is_empty() {
        eprintln!("Error: No transport enabled");
        process::exit(1);
    }

    let handles: Vec<_> = listeners
        .into_iter()
        .map(|listener| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                if let Err(e) = serve(listener, shared) {
                    log::error!("Listener stopped: {}", e);
                }
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.join();
    }
}
