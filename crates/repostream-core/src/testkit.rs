//! Builders for commit-diff CAR archives, for tests.
//!
//! Produces a real CAR v1 with a signed-commit-shaped root block, a
//! single-node MST (prefix compressed) and one DAG-CBOR block per record.
//! Knobs exist to tamper with or drop blocks so integrity failures can be
//! exercised end to end.

use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;
use minicbor::data::Tag;
use minicbor::Encoder;
use serde_json::Value;

use crate::cid::{write_varint, Cid, LINK_TAG};

type Enc = Encoder<Vec<u8>>;

/// A record payload, kept as encoded DAG-CBOR.
#[derive(Debug, Clone)]
pub struct RecordValue(Vec<u8>);

impl RecordValue {
    /// `{"text": <text>}`
    pub fn text_post(text: &str) -> Self {
        Self::json(&serde_json::json!({ "text": text }))
    }

    /// Encode a JSON value. Numbers must be integers.
    pub fn json(value: &Value) -> Self {
        let mut enc = Encoder::new(Vec::new());
        encode_json(&mut enc, value);
        Self(enc.into_writer())
    }

    /// Arbitrary bytes, e.g. something that is not valid DAG-CBOR.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn cid(&self) -> Cid {
        Cid::dag_cbor(&self.0)
    }
}

fn encode_json(enc: &mut Enc, value: &Value) {
    match value {
        Value::Null => {
            enc.null().expect("vec write");
        }
        Value::Bool(b) => {
            enc.bool(*b).expect("vec write");
        }
        Value::Number(n) => {
            let n = n.as_i64().expect("testkit only encodes integers");
            enc.i64(n).expect("vec write");
        }
        Value::String(s) => {
            enc.str(s).expect("vec write");
        }
        Value::Array(items) => {
            enc.array(items.len() as u64).expect("vec write");
            for item in items {
                encode_json(enc, item);
            }
        }
        Value::Object(map) => {
            enc.map(map.len() as u64).expect("vec write");
            for (k, v) in map {
                enc.str(k).expect("vec write");
                encode_json(enc, v);
            }
        }
    }
}

fn encode_link(enc: &mut Enc, cid: &Cid) {
    enc.tag(Tag::new(LINK_TAG))
        .expect("vec write")
        .bytes(&cid.to_link_bytes())
        .expect("vec write");
}

/// Assemble CAR bytes from explicit roots and blocks.
pub fn car_bytes(roots: &[Cid], blocks: &[(Cid, Vec<u8>)]) -> Bytes {
    let mut header = Encoder::new(Vec::new());
    header.map(2).expect("vec write");
    header.str("roots").expect("vec write");
    header.array(roots.len() as u64).expect("vec write");
    for root in roots {
        encode_link(&mut header, root);
    }
    header.str("version").expect("vec write").u64(1).expect("vec write");
    let header = header.into_writer();

    let mut out = Vec::new();
    write_varint(&mut out, header.len() as u64);
    out.extend_from_slice(&header);
    for (cid, data) in blocks {
        let cid = cid.to_bytes();
        write_varint(&mut out, (cid.len() + data.len()) as u64);
        out.extend_from_slice(&cid);
        out.extend_from_slice(data);
    }
    Bytes::from(out)
}

/// Output of [`RepoBuilder::build`].
#[derive(Debug, Clone)]
pub struct BuiltRepo {
    pub car: Bytes,
    pub records: BTreeMap<String, Cid>,
    pub record_bytes: BTreeMap<String, Vec<u8>>,
}

impl BuiltRepo {
    /// CID the MST links for `path`. Panics if the path was not added.
    pub fn cid_of(&self, path: &str) -> Cid {
        self.records
            .get(path)
            .cloned()
            .unwrap_or_else(|| panic!("no record at {path}"))
    }

    pub fn bytes_of(&self, path: &str) -> &[u8] {
        self.record_bytes
            .get(path)
            .unwrap_or_else(|| panic!("no record at {path}"))
    }
}

#[derive(Debug, Clone)]
pub struct RepoBuilder {
    did: String,
    rev: String,
    records: BTreeMap<String, RecordValue>,
    tampered: HashMap<String, RecordValue>,
    omitted: HashSet<String>,
    omit_commit: bool,
}

impl RepoBuilder {
    pub fn new(did: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            rev: rev.into(),
            records: BTreeMap::new(),
            tampered: HashMap::new(),
            omitted: HashSet::new(),
            omit_commit: false,
        }
    }

    pub fn record(mut self, path: impl Into<String>, value: RecordValue) -> Self {
        self.records.insert(path.into(), value);
        self
    }

    /// Store different bytes under the CID of the record at `path`.
    pub fn tamper(mut self, path: impl Into<String>, value: RecordValue) -> Self {
        self.tampered.insert(path.into(), value);
        self
    }

    /// Leave the record block for `path` out of the archive.
    pub fn omit_block(mut self, path: impl Into<String>) -> Self {
        self.omitted.insert(path.into());
        self
    }

    /// Leave the commit block out of the archive.
    pub fn omit_commit(mut self) -> Self {
        self.omit_commit = true;
        self
    }

    pub fn build(self) -> BuiltRepo {
        let records: BTreeMap<String, Cid> = self
            .records
            .iter()
            .map(|(path, value)| (path.clone(), value.cid()))
            .collect();

        // Single MST node holding every key, prefix compressed.
        let mut node = Encoder::new(Vec::new());
        node.map(2).expect("vec write");
        node.str("e").expect("vec write");
        node.array(records.len() as u64).expect("vec write");
        let mut prev = "";
        for (path, cid) in &records {
            let shared = prev
                .bytes()
                .zip(path.bytes())
                .take_while(|(a, b)| a == b)
                .count();
            node.map(4).expect("vec write");
            node.str("k").expect("vec write");
            node.bytes(&path.as_bytes()[shared..]).expect("vec write");
            node.str("p").expect("vec write").u64(shared as u64).expect("vec write");
            node.str("t").expect("vec write").null().expect("vec write");
            node.str("v").expect("vec write");
            encode_link(&mut node, cid);
            prev = path.as_str();
        }
        node.str("l").expect("vec write").null().expect("vec write");
        let node = node.into_writer();
        let node_cid = Cid::dag_cbor(&node);

        let mut commit = Encoder::new(Vec::new());
        commit.map(6).expect("vec write");
        commit.str("did").expect("vec write").str(&self.did).expect("vec write");
        commit.str("rev").expect("vec write").str(&self.rev).expect("vec write");
        commit.str("sig").expect("vec write").bytes(&[0u8; 64]).expect("vec write");
        commit.str("data").expect("vec write");
        encode_link(&mut commit, &node_cid);
        commit.str("prev").expect("vec write").null().expect("vec write");
        commit.str("version").expect("vec write").u64(3).expect("vec write");
        let commit = commit.into_writer();
        let commit_cid = Cid::dag_cbor(&commit);

        let mut blocks = Vec::new();
        if !self.omit_commit {
            blocks.push((commit_cid.clone(), commit));
        }
        blocks.push((node_cid, node));
        let mut record_bytes = BTreeMap::new();
        for (path, value) in &self.records {
            record_bytes.insert(path.clone(), value.bytes().to_vec());
            if self.omitted.contains(path) {
                continue;
            }
            let stored = self.tampered.get(path).unwrap_or(value);
            blocks.push((value.cid(), stored.bytes().to_vec()));
        }

        BuiltRepo {
            car: car_bytes(std::slice::from_ref(&commit_cid), &blocks),
            records,
            record_bytes,
        }
    }
}
