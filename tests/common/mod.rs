//! Shared test utilities for integration tests.
//!
//! Archives are assembled byte by byte so every test controls the exact
//! folder layout, coder ids and stored CRCs.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::rc::Rc;

use sevenz_extract::{AskMode, ExtractCallback, OperationResult};

pub const SIGNATURE: &[u8; 6] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

pub const COPY: &[u8] = &[0x00];
pub const LZMA: &[u8] = &[0x03, 0x01, 0x01];
pub const PPMD: &[u8] = &[0x03, 0x04, 0x01];
pub const AES: &[u8] = &[0x06, 0xF1, 0x07, 0x01];

const HEADER: u8 = 0x01;
const MAIN_STREAMS_INFO: u8 = 0x04;
const FILES_INFO: u8 = 0x05;
const PACK_INFO: u8 = 0x06;
const UNPACK_INFO: u8 = 0x07;
const SUBSTREAMS_INFO: u8 = 0x08;
const SIZE: u8 = 0x09;
const CRC: u8 = 0x0A;
const FOLDER: u8 = 0x0B;
const CODERS_UNPACK_SIZE: u8 = 0x0C;
const NUM_UNPACK_STREAM: u8 = 0x0D;
const EMPTY_STREAM: u8 = 0x0E;
const EMPTY_FILE: u8 = 0x0F;
const NAME: u8 = 0x11;
const MTIME: u8 = 0x14;
const END: u8 = 0x00;
const ENCODED_HEADER: u8 = 0x17;

/// Encodes a value with the 7z variable-length integer encoding.
pub fn write_number(buf: &mut Vec<u8>, value: u64) {
    let mut extra = 0usize;
    while extra < 8 && value >= 1u64 << (7 * (extra + 1)) {
        extra += 1;
    }
    let mut first = !(0xFFu8 >> extra);
    if extra < 8 {
        first |= (value >> (8 * extra)) as u8;
    }
    buf.push(first);
    buf.extend_from_slice(&value.to_le_bytes()[..extra]);
}

fn write_bits(buf: &mut Vec<u8>, bits: &[bool]) {
    for chunk in bits.chunks(8) {
        let mut byte = 0u8;
        for (i, &bit) in chunk.iter().enumerate() {
            if bit {
                byte |= 0x80 >> i;
            }
        }
        buf.push(byte);
    }
}

fn write_property(buf: &mut Vec<u8>, id: u8, body: &[u8]) {
    buf.push(id);
    write_number(buf, body.len() as u64);
    buf.extend_from_slice(body);
}

/// One single-coder folder holding consecutive files.
#[derive(Debug, Clone)]
pub struct FolderSpec {
    pub method: Vec<u8>,
    pub properties: Option<Vec<u8>>,
    pub packed: Vec<u8>,
    pub files: Vec<(String, Vec<u8>)>,
    pub store_crcs: bool,
    /// CRC of the whole decoded folder, stored in the folder record.
    pub folder_crc: Option<u32>,
}

impl FolderSpec {
    /// A Copy folder storing `files` verbatim.
    pub fn copy(files: &[(&str, &[u8])]) -> Self {
        let files: Vec<(String, Vec<u8>)> = files
            .iter()
            .map(|(name, data)| (name.to_string(), data.to_vec()))
            .collect();
        let packed = files.iter().flat_map(|(_, d)| d.iter().copied()).collect();
        Self {
            method: COPY.to_vec(),
            properties: None,
            packed,
            files,
            store_crcs: true,
            folder_crc: None,
        }
    }

    /// An LZMA folder compressing the concatenation of `files`.
    pub fn lzma(files: &[(&str, &[u8])]) -> Self {
        let mut folder = Self::copy(files);
        let (packed, properties) = lzma_compress(&folder.packed);
        folder.method = LZMA.to_vec();
        folder.properties = Some(properties);
        folder.packed = packed;
        folder
    }

    /// A folder whose coder id is `method`; the packed bytes are the plain data.
    pub fn with_method(files: &[(&str, &[u8])], method: &[u8]) -> Self {
        let mut folder = Self::copy(files);
        folder.method = method.to_vec();
        folder
    }

    pub fn without_crcs(mut self) -> Self {
        self.store_crcs = false;
        self
    }

    /// Stores the CRC of the concatenated files as the folder CRC.
    pub fn with_folder_crc(mut self) -> Self {
        let data: Vec<u8> = self.files.iter().flat_map(|(_, d)| d.clone()).collect();
        self.folder_crc = Some(crc32fast::hash(&data));
        self
    }

    /// A single file folder with a folder CRC takes its file CRC from it.
    fn inherits_crc(&self) -> bool {
        self.files.len() == 1 && self.folder_crc.is_some()
    }

    pub fn unpack_size(&self) -> u64 {
        self.files.iter().map(|(_, d)| d.len() as u64).sum()
    }
}

/// Compresses `data` as a raw LZMA stream; returns `(packed, coder properties)`.
pub fn lzma_compress(data: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let opts = lzma_rust2::LzmaOptions::with_preset(1);
    let mut writer = lzma_rust2::LzmaWriter::new_no_header(Vec::new(), &opts, true).unwrap();
    writer.write_all(data).unwrap();
    let packed = writer.finish().unwrap();

    let mut props = vec![opts.get_props()];
    props.extend_from_slice(&opts.dict_size.to_le_bytes());
    (packed, props)
}

/// Entry without data.
#[derive(Debug, Clone)]
pub enum EmptyEntry {
    Directory(String),
    File(String),
}

/// Assembles a complete 7z archive in memory.
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    pub stub: Vec<u8>,
    pub folders: Vec<FolderSpec>,
    pub empty: Vec<EmptyEntry>,
    pub mtime: Option<u64>,
    pub encode_header: bool,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn folder(mut self, folder: FolderSpec) -> Self {
        self.folders.push(folder);
        self
    }

    pub fn directory(mut self, name: &str) -> Self {
        self.empty.push(EmptyEntry::Directory(name.to_string()));
        self
    }

    pub fn empty_file(mut self, name: &str) -> Self {
        self.empty.push(EmptyEntry::File(name.to_string()));
        self
    }

    /// Prepends bytes before the signature, like an SFX stub.
    pub fn stub(mut self, stub: &[u8]) -> Self {
        self.stub = stub.to_vec();
        self
    }

    /// Stores the same FILETIME as every entry's modification time.
    pub fn mtime(mut self, filetime: u64) -> Self {
        self.mtime = Some(filetime);
        self
    }

    /// Stores the header behind an encoded header using a Copy folder.
    pub fn encode_header(mut self) -> Self {
        self.encode_header = true;
        self
    }

    /// Byte position (from the start of the archive) of folder `index`'s packed data.
    pub fn pack_position(&self, index: usize) -> usize {
        self.stub.len()
            + 32
            + self.folders[..index]
                .iter()
                .map(|f| f.packed.len())
                .sum::<usize>()
    }

    pub fn build(&self) -> Vec<u8> {
        let mut data: Vec<u8> = self.folders.iter().flat_map(|f| f.packed.clone()).collect();
        let mut header = self.header();

        if self.encode_header {
            let position = data.len() as u64;
            let crc = crc32fast::hash(&header);
            data.extend_from_slice(&header);

            let mut encoded = vec![ENCODED_HEADER];
            encoded.extend(streams_info(
                position,
                &[FolderRecord {
                    method: COPY.to_vec(),
                    properties: None,
                    pack_size: header.len() as u64,
                    unpack_size: header.len() as u64,
                    crc: Some(crc),
                }],
            ));
            header = encoded;
        }

        let mut archive = self.stub.clone();
        archive.extend_from_slice(&start_header(
            data.len() as u64,
            header.len() as u64,
            crc32fast::hash(&header),
        ));
        archive.extend_from_slice(&data);
        archive.extend_from_slice(&header);
        archive
    }

    fn header(&self) -> Vec<u8> {
        let mut h = vec![HEADER];

        if !self.folders.is_empty() {
            h.push(MAIN_STREAMS_INFO);
            let records: Vec<FolderRecord> = self
                .folders
                .iter()
                .map(|f| FolderRecord {
                    method: f.method.clone(),
                    properties: f.properties.clone(),
                    pack_size: f.packed.len() as u64,
                    unpack_size: f.unpack_size(),
                    crc: f.folder_crc,
                })
                .collect();
            let mut info = streams_info(0, &records);
            // Reopen the streams info to append substreams before its END.
            info.pop();
            h.extend(info);

            h.push(SUBSTREAMS_INFO);
            h.push(NUM_UNPACK_STREAM);
            for folder in &self.folders {
                write_number(&mut h, folder.files.len() as u64);
            }
            h.push(SIZE);
            for folder in &self.folders {
                if let Some((_, init)) = folder.files.split_last() {
                    for (_, file) in init {
                        write_number(&mut h, file.len() as u64);
                    }
                }
            }
            let crcs: Vec<Option<u32>> = self
                .folders
                .iter()
                .filter(|f| !f.inherits_crc())
                .flat_map(|f| {
                    f.files
                        .iter()
                        .map(move |(_, d)| f.store_crcs.then(|| crc32fast::hash(d)))
                })
                .collect();
            if crcs.iter().any(Option::is_some) {
                h.push(CRC);
                h.push(0);
                write_bits(&mut h, &crcs.iter().map(Option::is_some).collect::<Vec<_>>());
                for crc in crcs.iter().flatten() {
                    h.extend_from_slice(&crc.to_le_bytes());
                }
            }
            h.push(END);
            h.push(END);
        }

        let mut names: Vec<&str> = self
            .folders
            .iter()
            .flat_map(|f| f.files.iter().map(|(n, _)| n.as_str()))
            .collect();
        let with_data = names.len();
        for entry in &self.empty {
            names.push(match entry {
                EmptyEntry::Directory(n) | EmptyEntry::File(n) => n.as_str(),
            });
        }

        if !names.is_empty() {
            h.push(FILES_INFO);
            write_number(&mut h, names.len() as u64);

            let mut body = vec![0u8];
            for name in &names {
                for unit in name.encode_utf16() {
                    body.extend_from_slice(&unit.to_le_bytes());
                }
                body.extend_from_slice(&[0, 0]);
            }
            write_property(&mut h, NAME, &body);

            if !self.empty.is_empty() {
                let mut body = Vec::new();
                let flags: Vec<bool> = (0..names.len()).map(|i| i >= with_data).collect();
                write_bits(&mut body, &flags);
                write_property(&mut h, EMPTY_STREAM, &body);

                let mut body = Vec::new();
                let flags: Vec<bool> = self
                    .empty
                    .iter()
                    .map(|e| matches!(e, EmptyEntry::File(_)))
                    .collect();
                write_bits(&mut body, &flags);
                write_property(&mut h, EMPTY_FILE, &body);
            }

            if let Some(filetime) = self.mtime {
                let mut body = vec![1u8, 0u8];
                for _ in &names {
                    body.extend_from_slice(&filetime.to_le_bytes());
                }
                write_property(&mut h, MTIME, &body);
            }
            h.push(END);
        }

        h.push(END);
        h
    }
}

/// Header description of one single-coder folder.
struct FolderRecord {
    method: Vec<u8>,
    properties: Option<Vec<u8>>,
    pack_size: u64,
    unpack_size: u64,
    crc: Option<u32>,
}

/// Streams info describing `folders` packed back to back from `pack_pos`.
///
/// Ends with the END of the streams info itself.
fn streams_info(pack_pos: u64, folders: &[FolderRecord]) -> Vec<u8> {
    let mut s = vec![PACK_INFO];
    write_number(&mut s, pack_pos);
    write_number(&mut s, folders.len() as u64);
    s.push(SIZE);
    for folder in folders {
        write_number(&mut s, folder.pack_size);
    }
    s.push(END);

    s.push(UNPACK_INFO);
    s.push(FOLDER);
    write_number(&mut s, folders.len() as u64);
    s.push(0);
    for folder in folders {
        write_number(&mut s, 1);
        let mut flag = folder.method.len() as u8;
        if folder.properties.is_some() {
            flag |= 0x20;
        }
        s.push(flag);
        s.extend_from_slice(&folder.method);
        if let Some(props) = &folder.properties {
            write_number(&mut s, props.len() as u64);
            s.extend_from_slice(props);
        }
    }
    s.push(CODERS_UNPACK_SIZE);
    for folder in folders {
        write_number(&mut s, folder.unpack_size);
    }
    if folders.iter().any(|f| f.crc.is_some()) {
        s.push(CRC);
        s.push(0);
        write_bits(&mut s, &folders.iter().map(|f| f.crc.is_some()).collect::<Vec<_>>());
        for crc in folders.iter().filter_map(|f| f.crc) {
            s.extend_from_slice(&crc.to_le_bytes());
        }
    }
    s.push(END);
    s.push(END);
    s
}

/// Signature header for a next header at `offset` after the 32-byte header.
pub fn start_header(offset: u64, size: u64, crc: u32) -> Vec<u8> {
    let mut tail = Vec::new();
    tail.extend_from_slice(&offset.to_le_bytes());
    tail.extend_from_slice(&size.to_le_bytes());
    tail.extend_from_slice(&crc.to_le_bytes());

    let mut data = SIGNATURE.to_vec();
    data.extend_from_slice(&[0, 4]);
    data.extend_from_slice(&crc32fast::hash(&tail).to_le_bytes());
    data.extend_from_slice(&tail);
    data
}

/// One observed callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Total(u64),
    Completed(u64),
    GetStream(usize, AskMode),
    Prepare(AskMode),
    Result(usize, OperationResult),
}

#[derive(Clone, Default)]
struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Callback recording every call and every byte delivered to a sink.
#[derive(Default)]
pub struct RecordingCallback {
    pub events: Vec<Event>,
    sinks: BTreeMap<usize, SharedSink>,
    /// Files for which `get_stream` returns `None`.
    pub skip: Vec<usize>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Total(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    pub fn completed(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Completed(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    pub fn asked(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::GetStream(i, _) => Some(*i),
                _ => None,
            })
            .collect()
    }

    pub fn results(&self) -> BTreeMap<usize, OperationResult> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Result(i, r) => Some((*i, *r)),
                _ => None,
            })
            .collect()
    }

    pub fn data(&self, index: usize) -> Option<Vec<u8>> {
        self.sinks.get(&index).map(|s| s.0.borrow().clone())
    }
}

impl ExtractCallback for RecordingCallback {
    fn set_total(&mut self, total: u64) -> sevenz_extract::Result<()> {
        self.events.push(Event::Total(total));
        Ok(())
    }

    fn set_completed(&mut self, completed: u64) -> sevenz_extract::Result<()> {
        self.events.push(Event::Completed(completed));
        Ok(())
    }

    fn get_stream(
        &mut self,
        index: usize,
        mode: AskMode,
    ) -> sevenz_extract::Result<Option<Box<dyn Write>>> {
        self.events.push(Event::GetStream(index, mode));
        if self.skip.contains(&index) {
            return Ok(None);
        }
        let sink = SharedSink::default();
        self.sinks.insert(index, sink.clone());
        Ok(Some(Box::new(sink)))
    }

    fn prepare_operation(&mut self, mode: AskMode) -> sevenz_extract::Result<()> {
        self.events.push(Event::Prepare(mode));
        Ok(())
    }

    fn set_operation_result(
        &mut self,
        index: usize,
        result: OperationResult,
    ) -> sevenz_extract::Result<()> {
        self.events.push(Event::Result(index, result));
        Ok(())
    }
}

/// Deterministic pseudo-random bytes.
pub fn sample_bytes(len: usize, seed: u64) -> Vec<u8> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.r#gen::<u8>()).collect()
}
