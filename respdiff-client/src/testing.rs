//! In-process RESP server for tests.
//!
//! Backs enough of the command surface (scan, probes, value fetches,
//! partial-field probes) to drive the client and the verifiers end to end
//! without a real store. Not wired into any production path.

use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use respdiff_core::{FxHashMap, FxHashSet};

use crate::codec::decode_reply;
use crate::resp::Reply;

/// One consumer group of a mock stream: name, last-delivered id, and the
/// pending entry list as `(entry id, consumer name)`.
#[derive(Debug, Clone, Default)]
pub struct StreamGroup {
    pub name: Vec<u8>,
    pub last_delivered: Vec<u8>,
    pub pending: Vec<(Vec<u8>, Vec<u8>)>,
}

/// A mock stream: entries in id order plus consumer-group state.
#[derive(Debug, Clone, Default)]
pub struct StreamValue {
    pub entries: Vec<(Vec<u8>, Vec<(Vec<u8>, Vec<u8>)>)>,
    pub groups: Vec<StreamGroup>,
}

/// One stored value.
#[derive(Debug, Clone)]
pub enum StoreValue {
    Str(Vec<u8>),
    Hash(FxHashMap<Vec<u8>, Vec<u8>>),
    List(Vec<Vec<u8>>),
    Set(FxHashSet<Vec<u8>>),
    Zset(FxHashMap<Vec<u8>, Vec<u8>>),
    Stream(StreamValue),
}

impl StoreValue {
    fn type_name(&self) -> &'static str {
        match self {
            StoreValue::Str(_) => "string",
            StoreValue::Hash(_) => "hash",
            StoreValue::List(_) => "list",
            StoreValue::Set(_) => "set",
            StoreValue::Zset(_) => "zset",
            StoreValue::Stream(_) => "stream",
        }
    }

    fn len(&self) -> i64 {
        match self {
            StoreValue::Str(s) => s.len() as i64,
            StoreValue::Hash(h) => h.len() as i64,
            StoreValue::List(l) => l.len() as i64,
            StoreValue::Set(s) => s.len() as i64,
            StoreValue::Zset(z) => z.len() as i64,
            StoreValue::Stream(s) => s.entries.len() as i64,
        }
    }

    fn len_command(&self) -> &'static str {
        match self {
            StoreValue::Str(_) => "STRLEN",
            StoreValue::Hash(_) => "HLEN",
            StoreValue::List(_) => "LLEN",
            StoreValue::Set(_) => "SCARD",
            StoreValue::Zset(_) => "ZCARD",
            StoreValue::Stream(_) => "XLEN",
        }
    }
}

/// Numeric `(ms, seq)` order of stream ids.
fn stream_id_key(id: &[u8]) -> (u64, u64) {
    let text = String::from_utf8_lossy(id);
    match text.split_once('-') {
        Some((ms, seq)) => (ms.parse().unwrap_or(0), seq.parse().unwrap_or(0)),
        None => (text.parse().unwrap_or(0), 0),
    }
}

type Db = FxHashMap<Vec<u8>, StoreValue>;

/// A miniature single-db RESP store listening on a loopback port.
pub struct MiniStore {
    data: Arc<Mutex<Db>>,
    addr: String,
}

impl MiniStore {
    /// Start a store with the given contents.
    pub fn start(data: Db) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr").to_string();
        let shared = Arc::new(Mutex::new(data));

        let accept_data = Arc::clone(&shared);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let data = Arc::clone(&accept_data);
                thread::spawn(move || serve(stream, &data));
            }
        });

        Self { data: shared, addr }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Mutate the stored data mid-test.
    pub fn with_data(&self, f: impl FnOnce(&mut Db)) {
        f(&mut self.data.lock().expect("store lock"));
    }

    // Seeding helpers.

    pub fn set(&self, key: &[u8], value: &[u8]) {
        self.with_data(|db| {
            db.insert(key.to_vec(), StoreValue::Str(value.to_vec()));
        });
    }

    pub fn hset(&self, key: &[u8], pairs: &[(&[u8], &[u8])]) {
        self.with_data(|db| {
            let mut map = FxHashMap::default();
            for (f, v) in pairs {
                map.insert(f.to_vec(), v.to_vec());
            }
            db.insert(key.to_vec(), StoreValue::Hash(map));
        });
    }

    pub fn sadd(&self, key: &[u8], members: &[&[u8]]) {
        self.with_data(|db| {
            let mut set = FxHashSet::default();
            for m in members {
                set.insert(m.to_vec());
            }
            db.insert(key.to_vec(), StoreValue::Set(set));
        });
    }

    pub fn rpush(&self, key: &[u8], items: &[&[u8]]) {
        self.with_data(|db| {
            db.insert(
                key.to_vec(),
                StoreValue::List(items.iter().map(|i| i.to_vec()).collect()),
            );
        });
    }

    pub fn zadd(&self, key: &[u8], pairs: &[(&[u8], &[u8])]) {
        self.with_data(|db| {
            let mut map = FxHashMap::default();
            for (m, score) in pairs {
                map.insert(m.to_vec(), score.to_vec());
            }
            db.insert(key.to_vec(), StoreValue::Zset(map));
        });
    }

    pub fn xadd(&self, key: &[u8], id: &[u8], fields: &[(&[u8], &[u8])]) {
        self.with_data(|db| {
            let entry = db
                .entry(key.to_vec())
                .or_insert_with(|| StoreValue::Stream(StreamValue::default()));
            if let StoreValue::Stream(stream) = entry {
                stream.entries.push((
                    id.to_vec(),
                    fields.iter().map(|(f, v)| (f.to_vec(), v.to_vec())).collect(),
                ));
                stream.entries.sort_by_key(|(id, _)| stream_id_key(id));
            }
        });
    }

    pub fn xgroup(&self, key: &[u8], name: &[u8], pending: &[(&[u8], &[u8])]) {
        self.with_data(|db| {
            let entry = db
                .entry(key.to_vec())
                .or_insert_with(|| StoreValue::Stream(StreamValue::default()));
            if let StoreValue::Stream(stream) = entry {
                let mut pending: Vec<(Vec<u8>, Vec<u8>)> = pending
                    .iter()
                    .map(|(id, consumer)| (id.to_vec(), consumer.to_vec()))
                    .collect();
                pending.sort_by_key(|(id, _)| stream_id_key(id));
                stream.groups.push(StreamGroup {
                    name: name.to_vec(),
                    last_delivered: b"0-0".to_vec(),
                    pending,
                });
            }
        });
    }
}

fn serve(stream: TcpStream, data: &Mutex<Db>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut writer = BufWriter::new(stream);

    loop {
        let request = match decode_reply(&mut reader, "mock") {
            Ok(reply) => reply,
            Err(_) => return,
        };
        let Reply::Array(items) = request else { return };
        let mut args: Vec<Vec<u8>> = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Reply::Bulk(b) => args.push(b),
                _ => return,
            }
        }
        let response = {
            let db = data.lock().expect("store lock");
            dispatch(&db, &args)
        };
        if writer.write_all(&response).is_err() || writer.flush().is_err() {
            return;
        }
    }
}

fn dispatch(db: &Db, args: &[Vec<u8>]) -> Vec<u8> {
    let Some(name) = args.first() else {
        return error("ERR empty command");
    };
    let name = String::from_utf8_lossy(name).to_uppercase();
    let key = args.get(1).map(|k| k.as_slice()).unwrap_or(b"");

    match name.as_str() {
        "PING" => status("PONG"),
        "SELECT" | "AUTH" | "ADMINAUTH" => status("OK"),
        "INFO" => {
            let payload = format!("# Keyspace\r\ndb0:keys={},expires=0,avg_ttl=0\r\n", db.len());
            bulk(payload.as_bytes())
        }
        "SCAN" => {
            let mut out = Vec::new();
            out.extend_from_slice(b"*2\r\n$1\r\n0\r\n");
            out.extend_from_slice(&array_header(db.len()));
            for k in db.keys() {
                out.extend_from_slice(&bulk(k));
            }
            out
        }
        "TYPE" => status(db.get(key).map_or("none", |v| v.type_name())),
        "EXISTS" => int(i64::from(db.contains_key(key))),
        "TTL" => int(if db.contains_key(key) { -1 } else { -2 }),
        "STRLEN" | "HLEN" | "LLEN" | "SCARD" | "ZCARD" | "XLEN" => match db.get(key) {
            None => int(0),
            Some(v) if v.len_command() == name => int(v.len()),
            Some(_) => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
        },
        "GET" => match db.get(key) {
            Some(StoreValue::Str(s)) => bulk(s),
            Some(_) => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            None => nil(),
        },
        "HGETALL" => match db.get(key) {
            Some(StoreValue::Hash(h)) => pairs_reply(h.iter()),
            Some(_) => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            None => empty_array(),
        },
        "SMEMBERS" => match db.get(key) {
            Some(StoreValue::Set(s)) => {
                let mut out = array_header(s.len());
                for m in s {
                    out.extend_from_slice(&bulk(m));
                }
                out
            }
            Some(_) => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            None => empty_array(),
        },
        "LRANGE" => match db.get(key) {
            Some(StoreValue::List(l)) => {
                let start = parse_index(args.get(2), l.len());
                let stop = parse_index(args.get(3), l.len());
                if start >= l.len() || stop < start {
                    return empty_array();
                }
                let stop = stop.min(l.len() - 1);
                let window = &l[start..=stop];
                let mut out = array_header(window.len());
                for item in window {
                    out.extend_from_slice(&bulk(item));
                }
                out
            }
            Some(_) => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            None => empty_array(),
        },
        "ZRANGE" => match db.get(key) {
            Some(StoreValue::Zset(z)) => {
                let mut entries: Vec<(&Vec<u8>, &Vec<u8>)> = z.iter().collect();
                entries.sort_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)));
                let mut out = array_header(entries.len() * 2);
                for (m, score) in entries {
                    out.extend_from_slice(&bulk(m));
                    out.extend_from_slice(&bulk(score));
                }
                out
            }
            Some(_) => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            None => empty_array(),
        },
        "HSCAN" => match db.get(key) {
            Some(StoreValue::Hash(h)) => scan_page(pairs_reply(h.iter())),
            Some(_) => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            None => scan_page(empty_array()),
        },
        "SSCAN" => match db.get(key) {
            Some(StoreValue::Set(s)) => {
                let mut body = array_header(s.len());
                for m in s {
                    body.extend_from_slice(&bulk(m));
                }
                scan_page(body)
            }
            Some(_) => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            None => scan_page(empty_array()),
        },
        "ZSCAN" => match db.get(key) {
            Some(StoreValue::Zset(z)) => scan_page(pairs_reply(z.iter())),
            Some(_) => error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            None => scan_page(empty_array()),
        },
        "HMGET" => match db.get(key) {
            Some(StoreValue::Hash(h)) => {
                let fields = &args[2..];
                let mut out = array_header(fields.len());
                for f in fields {
                    match h.get(f) {
                        Some(v) => out.extend_from_slice(&bulk(v)),
                        None => out.extend_from_slice(&nil()),
                    }
                }
                out
            }
            _ => {
                let fields = &args[2..];
                let mut out = array_header(fields.len());
                for _ in fields {
                    out.extend_from_slice(&nil());
                }
                out
            }
        },
        "SISMEMBER" => match db.get(key) {
            Some(StoreValue::Set(s)) => int(i64::from(s.contains(args.get(2).map(|a| a.as_slice()).unwrap_or(b"")))),
            _ => int(0),
        },
        "ZSCORE" => match db.get(key) {
            Some(StoreValue::Zset(z)) => match args.get(2).and_then(|m| z.get(m.as_slice())) {
                Some(score) => bulk(score),
                None => nil(),
            },
            _ => nil(),
        },
        "XINFO" => {
            // only the GROUPS subcommand is served
            let key = args.get(2).map(|k| k.as_slice()).unwrap_or(b"");
            match db.get(key) {
                Some(StoreValue::Stream(stream)) => {
                    let mut out = array_header(stream.groups.len());
                    for group in &stream.groups {
                        out.extend_from_slice(&array_header(8));
                        out.extend_from_slice(&bulk(b"name"));
                        out.extend_from_slice(&bulk(&group.name));
                        out.extend_from_slice(&bulk(b"consumers"));
                        out.extend_from_slice(&int(1));
                        out.extend_from_slice(&bulk(b"pending"));
                        out.extend_from_slice(&int(group.pending.len() as i64));
                        out.extend_from_slice(&bulk(b"last-delivered-id"));
                        out.extend_from_slice(&bulk(&group.last_delivered));
                    }
                    out
                }
                _ => empty_array(),
            }
        }
        "XRANGE" => match db.get(key) {
            Some(StoreValue::Stream(stream)) => {
                let start = stream_id_key(args.get(2).map(|a| a.as_slice()).unwrap_or(b"0-0"));
                let count = parse_count(args);
                let mut out = Vec::new();
                let selected: Vec<_> = stream
                    .entries
                    .iter()
                    .filter(|(id, _)| stream_id_key(id) >= start)
                    .take(count)
                    .collect();
                out.extend_from_slice(&array_header(selected.len()));
                for (id, fields) in selected {
                    out.extend_from_slice(&array_header(2));
                    out.extend_from_slice(&bulk(id));
                    out.extend_from_slice(&array_header(fields.len() * 2));
                    for (f, v) in fields {
                        out.extend_from_slice(&bulk(f));
                        out.extend_from_slice(&bulk(v));
                    }
                }
                out
            }
            _ => empty_array(),
        },
        "XPENDING" => match db.get(key) {
            Some(StoreValue::Stream(stream)) => {
                let group_name = args.get(2).map(|a| a.as_slice()).unwrap_or(b"");
                let start = stream_id_key(args.get(3).map(|a| a.as_slice()).unwrap_or(b"0-0"));
                let count: usize = args
                    .get(5)
                    .and_then(|a| std::str::from_utf8(a).ok())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(usize::MAX);
                let Some(group) = stream.groups.iter().find(|g| g.name == group_name) else {
                    return error("NOGROUP No such consumer group");
                };
                let selected: Vec<_> = group
                    .pending
                    .iter()
                    .filter(|(id, _)| stream_id_key(id) >= start)
                    .take(count)
                    .collect();
                let mut out = array_header(selected.len());
                for (id, consumer) in selected {
                    out.extend_from_slice(&array_header(4));
                    out.extend_from_slice(&bulk(id));
                    out.extend_from_slice(&bulk(consumer));
                    out.extend_from_slice(&int(0));
                    out.extend_from_slice(&int(1));
                }
                out
            }
            _ => empty_array(),
        },
        _ => error(&format!("ERR unknown command `{name}`")),
    }
}

fn parse_count(args: &[Vec<u8>]) -> usize {
    args.iter()
        .position(|a| a.eq_ignore_ascii_case(b"COUNT"))
        .and_then(|i| args.get(i + 1))
        .and_then(|a| std::str::from_utf8(a).ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(usize::MAX)
}

fn parse_index(arg: Option<&Vec<u8>>, len: usize) -> usize {
    let raw: i64 = arg
        .and_then(|a| std::str::from_utf8(a).ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    if raw < 0 {
        (len as i64 + raw).max(0) as usize
    } else {
        raw as usize
    }
}

fn pairs_reply<'a>(iter: impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)>) -> Vec<u8> {
    let entries: Vec<_> = iter.collect();
    let mut out = array_header(entries.len() * 2);
    for (f, v) in entries {
        out.extend_from_slice(&bulk(f));
        out.extend_from_slice(&bulk(v));
    }
    out
}

fn scan_page(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"*2\r\n$1\r\n0\r\n");
    out.extend_from_slice(&body);
    out
}

fn status(s: &str) -> Vec<u8> {
    format!("+{s}\r\n").into_bytes()
}

fn error(s: &str) -> Vec<u8> {
    format!("-{s}\r\n").into_bytes()
}

fn int(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

fn nil() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

fn bulk(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
    out
}

fn array_header(len: usize) -> Vec<u8> {
    format!("*{len}\r\n").into_bytes()
}

fn empty_array() -> Vec<u8> {
    array_header(0)
}
