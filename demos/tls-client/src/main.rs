use log::*;
use rustls::{Certificate, ClientConfig, ClientSession, PrivateKey, Session, Stream};
use std::env;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // get ip address, domain and certificate paths from cmd line args
    let args = parse_args();

    // construct `rustls` client config
    let mut client_config = ClientConfig::new();
    client_config
        .root_store
        .add_pem_file(&mut BufReader::new(File::open(&args.cafile_path)?))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid cert"))?;

    if let Some((cert_path, key_path)) = &args.client_identity {
        let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))?
            .into_iter()
            .map(Certificate)
            .collect();
        let mut keys =
            rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(File::open(key_path)?))?;
        if keys.is_empty() {
            anyhow::bail!("no PKCS#8 private key found in {}", key_path);
        }

        client_config.set_single_client_cert(certs, PrivateKey(keys.remove(0)))?;
    }

    let domain = webpki::DNSNameRef::try_from_ascii_str(&args.domain)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid domain name"))?;

    // create a client connection to the server
    let mut session = ClientSession::new(&Arc::new(client_config), domain);
    let mut socket = TcpStream::connect(&args.ip_address)?;
    let mut conn = Stream::new(&mut session, &mut socket);

    // send a message to the server
    let raw_msg = String::from("Hello world");
    info!("Sending message: {}", raw_msg);
    conn.write_all(raw_msg.as_bytes())?;

    // wait for the server to echo it back
    let mut reply = vec![0u8; raw_msg.len()];
    conn.read_exact(&mut reply)?;
    info!("Received reply: {}", String::from_utf8_lossy(&reply));

    session.send_close_notify();
    session.complete_io(&mut socket)?;

    Ok(())
}

struct Args {
    ip_address: String,
    domain: String,
    cafile_path: String,
    client_identity: Option<(String, String)>,
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();

    let ip_address = match args.get(1) {
        Some(addr) => addr,
        None => {
            error!("Need to pass IP address to connect to as first command line argument");
            panic!();
        }
    };

    let domain = match args.get(2) {
        Some(d) => d,
        None => {
            error!("Need to pass domain name as second command line argument");
            panic!();
        }
    };

    let cafile_path = match args.get(3) {
        Some(d) => d,
        None => {
            error!("Need to pass path to cafile as third command line argument");
            panic!();
        }
    };

    let client_identity = match (args.get(4), args.get(5)) {
        (Some(cert), Some(key)) => Some((cert.to_string(), key.to_string())),
        _ => None,
    };

    Args {
        ip_address: ip_address.to_string(),
        domain: domain.to_string(),
        cafile_path: cafile_path.to_string(),
        client_identity,
    }
}
