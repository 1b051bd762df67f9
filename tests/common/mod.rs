//! Builds small index container files on disk for the integration
//! tests: a primary header plus binary-table extensions, including
//! whole single-leaf kd-trees.

use std::io::Write;

use tempfile::NamedTempFile;

use astro_index::container::host_endian_fingerprint;

const BLOCK: usize = 2880;
const CARD: usize = 80;

pub fn int(key: &str, v: i64) -> String {
    format!("{:<8}= {:>20}", key, v)
}

pub fn real(key: &str, v: f64) -> String {
    format!("{:<8}= {:>20}", key, format!("{:.10E}", v))
}

pub fn strv(key: &str, v: &str) -> String {
    format!("{:<8}= '{}'", key, v)
}

pub fn logical(key: &str, v: bool) -> String {
    format!("{:<8}= {:>20}", key, if v { "T" } else { "F" })
}

pub fn host_endian() -> String {
    host_endian_fingerprint()
}

pub struct FitsBuilder {
    buf: Vec<u8>,
}

impl FitsBuilder {
    pub fn new(primary_cards: &[String]) -> FitsBuilder {
        let mut builder = FitsBuilder { buf: Vec::new() };
        let mut cards = vec![logical("SIMPLE", true), int("BITPIX", 8), int("NAXIS", 0)];
        cards.extend_from_slice(primary_cards);
        builder.push_header(&cards);
        builder
    }

    fn push_header(&mut self, cards: &[String]) {
        for card in cards {
            let mut bytes = card.as_bytes().to_vec();
            assert!(bytes.len() <= CARD, "card too long: {}", card);
            bytes.resize(CARD, b' ');
            self.buf.extend_from_slice(&bytes);
        }
        let mut end = b"END".to_vec();
        end.resize(CARD, b' ');
        self.buf.extend_from_slice(&end);
        while self.buf.len() % BLOCK != 0 {
            self.buf.push(b' ');
        }
    }

    fn push_data(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        while self.buf.len() % BLOCK != 0 {
            self.buf.push(0);
        }
    }

    pub fn bintable(
        &mut self,
        name: &str,
        row_bytes: usize,
        rows: usize,
        extra: &[String],
        data: &[u8],
    ) {
        assert_eq!(data.len(), row_bytes * rows);
        let mut cards = vec![
            strv("XTENSION", "BINTABLE"),
            int("BITPIX", 8),
            int("NAXIS", 2),
            int("NAXIS1", row_bytes as i64),
            int("NAXIS2", rows as i64),
            int("PCOUNT", 0),
            int("GCOUNT", 1),
            int("TFIELDS", 1),
            strv("TTYPE1", name),
        ];
        cards.extend_from_slice(extra);
        self.push_header(&cards);
        self.push_data(data);
    }

    pub fn finish(self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&self.buf).unwrap();
        file.flush().unwrap();
        file
    }
}

pub fn f64_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

pub fn u32_bytes(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

fn suffixed(prefix: &str, name: Option<&str>) -> String {
    match name {
        Some(n) => format!("{}_{}", prefix, n),
        None => prefix.to_string(),
    }
}

fn tree_header_cards(
    name: Option<&str>,
    ndim: usize,
    ndata: usize,
    data_type: &str,
) -> Vec<String> {
    let mut cards = vec![
        int("KDT_NDIM", ndim as i64),
        int("KDT_NDAT", ndata as i64),
        int("KDT_NNOD", 1),
        strv("KDT_EXT", "f64"),
        strv("KDT_INT", "f64"),
        strv("KDT_DATA", data_type),
        strv("ENDIAN", &host_endian()),
    ];
    if let Some(n) = name {
        cards.push(strv("KDT_NAME", n));
    }
    cards
}

/// Appends a complete single-leaf kd-tree (one node that is both root
/// and leaf) holding `f64` points in slot order.
pub fn add_tree_f64(
    builder: &mut FitsBuilder,
    name: Option<&str>,
    ndim: usize,
    data: &[f64],
    perm: Option<&[u32]>,
    extra_header: &[String],
) {
    assert_eq!(data.len() % ndim, 0);
    let ndata = data.len() / ndim;

    let mut cards = tree_header_cards(name, ndim, ndata, "f64");
    cards.extend_from_slice(extra_header);
    builder.bintable(&suffixed("kdtree_header", name), 1, 0, &cards, &[]);

    builder.bintable(
        &suffixed("kdtree_lr", name),
        4,
        1,
        &[],
        &(ndata as u32 - 1).to_ne_bytes(),
    );
    if let Some(p) = perm {
        assert_eq!(p.len(), ndata);
        builder.bintable(&suffixed("kdtree_perm", name), 4, ndata, &[], &u32_bytes(p));
    }

    let mut boxes = vec![f64::INFINITY; ndim];
    boxes.extend(vec![f64::NEG_INFINITY; ndim]);
    for point in data.chunks_exact(ndim) {
        for d in 0..ndim {
            boxes[d] = boxes[d].min(point[d]);
            boxes[ndim + d] = boxes[ndim + d].max(point[d]);
        }
    }
    builder.bintable(
        &suffixed("kdtree_bb", name),
        2 * ndim * 8,
        1,
        &[],
        &f64_bytes(&boxes),
    );

    builder.bintable(
        &suffixed("kdtree_data", name),
        ndim * 8,
        ndata,
        &[],
        &f64_bytes(data),
    );
}

/// Appends a single-leaf kd-tree with `u32` fixed-point storage. The
/// range slice is `2 * ndim + 1` doubles: minima, maxima, scale. Raw
/// values decode to `min[d] + raw / scale`.
pub fn add_tree_u32(
    builder: &mut FitsBuilder,
    name: Option<&str>,
    ndim: usize,
    raws: &[u32],
    range: &[f64],
    perm: Option<&[u32]>,
) {
    assert_eq!(raws.len() % ndim, 0);
    assert_eq!(range.len(), 2 * ndim + 1);
    let ndata = raws.len() / ndim;
    let scale = range[2 * ndim];

    let cards = tree_header_cards(name, ndim, ndata, "u32");
    builder.bintable(&suffixed("kdtree_header", name), 1, 0, &cards, &[]);

    builder.bintable(
        &suffixed("kdtree_lr", name),
        4,
        1,
        &[],
        &(ndata as u32 - 1).to_ne_bytes(),
    );
    if let Some(p) = perm {
        builder.bintable(&suffixed("kdtree_perm", name), 4, ndata, &[], &u32_bytes(p));
    }

    let mut boxes = vec![f64::INFINITY; ndim];
    boxes.extend(vec![f64::NEG_INFINITY; ndim]);
    for point in raws.chunks_exact(ndim) {
        for d in 0..ndim {
            let v = range[d] + point[d] as f64 / scale;
            boxes[d] = boxes[d].min(v);
            boxes[ndim + d] = boxes[ndim + d].max(v);
        }
    }
    builder.bintable(
        &suffixed("kdtree_bb", name),
        2 * ndim * 8,
        1,
        &[],
        &f64_bytes(&boxes),
    );

    builder.bintable(
        &suffixed("kdtree_data", name),
        ndim * 4,
        ndata,
        &[],
        &u32_bytes(raws),
    );
    builder.bintable(
        &suffixed("kdtree_range", name),
        8,
        2 * ndim + 1,
        &[],
        &f64_bytes(range),
    );
}
