use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use SimpleDB::protocol::messages;
use SimpleDB::{Client, Method, ParamBag, Server, ServerConfig, Store};

const T: &[u8] = &[0x54];

fn spawn_server() -> Result<SocketAddr> {
    let cfg = ServerConfig::default().with_port(0).with_worker_threads(4);
    let server = Server::bind(cfg, Arc::new(Store::in_memory()))?;
    let addr = server.local_addr()?;
    thread::spawn(move || server.serve());
    Ok(addr)
}

/// Две сессии пишут параллельно, каждая видит коммиты другой.
#[test]
fn concurrent_sessions_share_data() -> Result<()> {
    let addr = spawn_server()?;

    let workers: Vec<_> = (0..2u8)
        .map(|w| {
            thread::spawn(move || -> Result<()> {
                let c = Client::connect_tcp(addr)?;
                for i in 0..50u32 {
                    let wb = c.create_write_batch()?;
                    let key = format!("w{}-{:03}", w, i);
                    c.put(wb, T, key.as_bytes(), &i.to_le_bytes())?;
                    c.write(wb)?;
                }
                Ok(())
            })
        })
        .collect();
    for h in workers {
        h.join().expect("writer thread panicked")?;
    }

    let c = Client::connect_tcp(addr)?;
    let snap = c.use_snapshot()?;
    let it = c.new_iterator(snap, T, None, None)?;
    let mut n = 0;
    let mut ok = c.iterator_seek_to_first(it)?;
    while ok {
        n += 1;
        ok = c.iterator_next(it)?;
    }
    assert_eq!(n, 100);
    assert_eq!(
        c.get_value(T, b"w1-049", None)?,
        Some(49u32.to_le_bytes().to_vec())
    );
    Ok(())
}

/// Ответы могут приходить в любом порядке; ожидание в обратном порядке работает.
#[test]
fn many_requests_in_flight() -> Result<()> {
    let addr = spawn_server()?;
    let c = Client::connect_tcp(addr)?;

    let pending: Vec<_> = (0..20)
        .map(|_| c.send(c.request(Method::UseSnapshot, ParamBag::new())))
        .collect::<Result<_>>()?;
    let mut snaps = Vec::new();
    for p in pending.into_iter().rev() {
        snaps.push(messages::parse_snapid(&p.wait()?)?);
    }
    snaps.sort_unstable();
    snaps.dedup();
    assert_eq!(snaps.len(), 20);
    assert_eq!(c.pending_len(), 0);
    Ok(())
}

#[test]
fn cancel_and_fire_and_forget() -> Result<()> {
    let addr = spawn_server()?;
    let c = Client::connect_tcp(addr)?;

    let wb = c.create_write_batch()?;
    // Ответ на notify выбрасывается, но сам запрос выполняется.
    c.notify(messages::put("", wb, T, b"ff", b"1"))?;

    let req = c.request(Method::UseSnapshot, ParamBag::new());
    let id = req.id.clone();
    let reply = c.send(req)?;
    assert_eq!(reply.id(), id);
    // Ответ мог уже прийти; в любом случае после cancel записи нет.
    c.cancel(&id);
    assert_eq!(c.pending_len(), 0);
    drop(reply);

    c.put(wb, T, b"sync", b"2")?;
    c.write(wb)?;
    assert_eq!(c.get_value(T, b"sync", None)?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn duplicate_in_flight_id_is_refused() -> Result<()> {
    let addr = spawn_server()?;
    let c = Client::connect_tcp(addr)?;
    let a = c.send(messages::use_snapshot("same"))?;
    // Пока "same" в полёте, второй такой же id не принимается.
    if c.pending_len() == 1 {
        assert!(c.send(messages::use_snapshot("same")).is_err());
    }
    a.wait()?;
    assert!(c.send(messages::use_snapshot("")).is_err());
    Ok(())
}
