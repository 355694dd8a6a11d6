//! Line-oriented client for poking at a running server: whitespace-split
//! words become one request frame, the decoded reply is pretty-printed.

use std::{
    io::{self, BufRead, Read, Write},
    net::TcpStream,
};

use clap::Parser;
use ember_wire::{Reply, encode_request, try_decode_reply};

#[derive(Debug, Parser)]
#[command(name = "ember-cli", version)]
struct Opts {
    /// Server address.
    #[arg(long, default_value = "127.0.0.1:6379")]
    addr: String,
}

fn main() -> io::Result<()> {
    let opts = Opts::parse();
    let mut stream = TcpStream::connect(&opts.addr)?;
    println!("connected to {}", opts.addr);

    let stdin = io::stdin();
    let mut frame = Vec::new();
    let mut rx = Vec::new();
    let mut chunk = [0u8; 4096];

    for line in stdin.lock().lines() {
        let line = line?;
        let args: Vec<&[u8]> = line.split_whitespace().map(str::as_bytes).collect();
        if args.is_empty() {
            continue;
        }

        frame.clear();
        encode_request(&args, &mut frame);
        stream.write_all(&frame)?;

        loop {
            match try_decode_reply(&rx) {
                Ok(Some((reply, consumed))) => {
                    rx.drain(..consumed);
                    print_reply(&reply, 0);
                    break;
                }
                Ok(None) => {
                    let n = stream.read(&mut chunk)?;
                    if n == 0 {
                        eprintln!("server closed the connection");
                        return Ok(());
                    }
                    rx.extend_from_slice(&chunk[..n]);
                }
                Err(err) => {
                    eprintln!("bad reply: {err}");
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

fn print_reply(reply: &Reply, depth: usize) {
    let pad = "  ".repeat(depth);
    match reply {
        Reply::Nil => println!("{pad}(nil)"),
        Reply::Error { message, .. } => {
            println!("{pad}(error) {}", String::from_utf8_lossy(message));
        }
        Reply::Int(n) => println!("{pad}(integer) {n}"),
        Reply::String(s) => println!("{pad}\"{}\"", String::from_utf8_lossy(s)),
        Reply::Array(items) if items.is_empty() => println!("{pad}(empty array)"),
        Reply::Array(items) => {
            for item in items {
                print_reply(item, depth + 1);
            }
        }
    }
}
