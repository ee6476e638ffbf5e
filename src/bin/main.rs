use connlistener::{init_tracing, ConfigLoader, Listener, ListenerBuilder, ListenerRef, Reactor};
use connlistener::{SockAddr, Socket};
use std::env;

fn main() {
    init_tracing("info");

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <config_file>", args[0]);
        std::process::exit(1);
    }

    let config_path = &args[1];
    let config = match ConfigLoader::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error parsing config file: {}", e);
            std::process::exit(1);
        }
    };

    let reactor = match Reactor::with_capacity(config.event_capacity) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error creating reactor: {}", e);
            std::process::exit(1);
        }
    };

    let mut listeners: Vec<Listener> = Vec::with_capacity(config.listeners.len());
    for listener_config in &config.listeners {
        let on_accept = |lev: &ListenerRef<'_>, conn: Socket, peer: SockAddr| {
            tracing::info!(
                listener = lev.fd(),
                conn = conn.as_raw_fd(),
                "Accepted connection from {}",
                peer
            );
            drop(conn);
        };
        match ListenerBuilder::from_config(&reactor, listener_config)
            .bind(Some(listener_config.address), on_accept)
        {
            Ok(listener) => listeners.push(listener),
            Err(e) => {
                eprintln!("Error listening on {}: {}", listener_config.address, e);
                std::process::exit(1);
            }
        }
    }

    print_listener_info(&listeners);

    loop {
        if let Err(e) = reactor.turn(None) {
            eprintln!("Reactor error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_listener_info(listeners: &[Listener]) {
    println!("Listening on {} socket(s):", listeners.len());
    for listener in listeners {
        let addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        println!(
            "  {} (fd {}, {:?}, {:?})",
            addr,
            listener.fd(),
            listener.backend_kind(),
            listener.flags()
        );
    }
}
