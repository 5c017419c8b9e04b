use async_std::task;
use log::*;
use std::env;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use tls_channel::tls::{SecureChannel, SecureServerChannel, TlsContext};
use tls_channel::{ServerChannel, TcpServerChannel};

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // get ip address, certificate paths and client auth mode from cmd line args
    let args = parse_args();

    let context = TlsContext::from_pem_files(
        &args.cert_path,
        &args.key_path,
        args.client_ca_path.as_deref(),
    )?;

    // create a server
    let mut server = SecureServerChannel::listen(&args.ip_address, Arc::new(context))?;
    server.set_need_client_auth(args.need_client_auth);
    server.set_want_client_auth(args.client_ca_path.is_some() && !args.need_client_auth);

    info!("Listening on {}", server);

    // accepting blocks, so keep the loop off the executor threads
    task::spawn_blocking(move || serve(server)).await?;

    Ok(())
}

fn serve(server: SecureServerChannel<TcpServerChannel>) -> io::Result<()> {
    // handle server connections
    // wait for a connection to come in and be accepted
    while let Some((conn, peer_addr)) = server.accept()? {
        info!("Handling connection from {}", peer_addr);

        task::spawn_blocking(move || {
            if let Err(e) = echo(conn) {
                warn!("Connection from {} failed: {}", peer_addr, e);
            } else {
                info!("Connection from {} closed", peer_addr);
            }
        });
    }

    Ok(())
}

fn echo(mut conn: SecureChannel<TcpStream>) -> io::Result<()> {
    conn.complete_handshake()?;

    if let Some(certs) = conn.peer_certificates() {
        info!("Client presented {} certificate(s)", certs.len());
    }

    let mut buf = [0u8; 4096];
    loop {
        let n = match conn.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => break,
            Err(e) => return Err(e),
        };

        info!("Received a message \"{}\"", String::from_utf8_lossy(&buf[..n]));

        conn.write_all(&buf[..n])?;
        conn.flush()?;
        info!("Sent message back to original sender");
    }

    conn.shutdown()
}

struct Args {
    ip_address: String,
    cert_path: PathBuf,
    key_path: PathBuf,
    client_ca_path: Option<PathBuf>,
    need_client_auth: bool,
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();

    let ip_address = match args.get(1) {
        Some(addr) => addr,
        None => {
            error!("Need to pass IP address to listen on as first command line argument");
            panic!();
        }
    };

    let cert_path = match args.get(2) {
        Some(d) => d,
        None => {
            error!("Need to pass path to cert file as second command line argument");
            panic!();
        }
    };

    let key_path = match args.get(3) {
        Some(d) => d,
        None => {
            error!("Need to pass path to key file as third command line argument");
            panic!();
        }
    };

    Args {
        ip_address: ip_address.to_string(),
        cert_path: PathBuf::from(cert_path),
        key_path: PathBuf::from(key_path),
        client_ca_path: args.get(4).map(PathBuf::from),
        need_client_auth: args.get(5).map(|s| s == "need").unwrap_or(false),
    }
}
