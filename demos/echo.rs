extern crate env_logger;
extern crate fibrio;

use std::net::SocketAddr;
use std::str::FromStr;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5555";

fn listen_addr() -> SocketAddr {
    FromStr::from_str(DEFAULT_LISTEN_ADDR).unwrap()
}

fn main() {
    env_logger::init();

    fibrio::start(|| {
        let addr = listen_addr();
        let listener = fibrio::listen(addr).unwrap();

        println!("Starting tcp echo server on {:?}", fibrio::local_addr(listener).unwrap());

        loop {
            let conn = fibrio::accept(listener).unwrap();

            fibrio::spawn(move || {
                let mut buf = [0u8; 1024 * 16];
                loop {
                    let size = fibrio::read(conn, &mut buf).unwrap();
                    if size == 0 {
                        break;
                    }
                    fibrio::write(conn, &buf[0..size]).unwrap();
                }
                fibrio::close(conn).unwrap();
            })
            .unwrap();
        }
    })
    .unwrap();
}
