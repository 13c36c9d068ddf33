//! CR-011: MAF reader — LAST alignment blocks as bounded-size record chunks.
//!
//! Each block is an `a` line followed by exactly two `s` lines: the
//! database (subject) sequence first, then the query. `q`, `i`, and `p`
//! annotation lines are ignored; `#` lines are comments.

use super::{AlignmentRecord, Strand};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Records per chunk when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// One parsed `s` line.
struct SeqLine {
    name: String,
    start: u64,
    aln_len: u64,
    strand: Strand,
    len: u64,
}

/// Parsed `a` line.
struct BlockHeader {
    score: f64,
    eg2: Option<f64>,
    e_value: f64,
}

/// Streaming MAF parser over any buffered reader. Stops after the first
/// error.
pub struct MafReader<R> {
    lines: std::io::Lines<R>,
    source: String,
    line_no: usize,
    done: bool,
}

impl<R: BufRead> MafReader<R> {
    pub fn new(reader: R, source: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            source: source.into(),
            line_no: 0,
            done: false,
        }
    }

    fn fail(&mut self, msg: String) -> Option<Result<AlignmentRecord, String>> {
        self.done = true;
        Some(Err(format!("{}:{}: {}", self.source, self.line_no, msg)))
    }
}

impl<R: BufRead> Iterator for MafReader<R> {
    type Item = Result<AlignmentRecord, String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut header: Option<BlockHeader> = None;
        let mut seqs: Vec<SeqLine> = Vec::with_capacity(2);

        loop {
            let line = match self.lines.next() {
                None => break,
                Some(Err(e)) => return self.fail(format!("read error: {}", e)),
                Some(Ok(l)) => l,
            };
            self.line_no += 1;
            let line = line.trim_end();

            if line.is_empty() {
                if header.is_some() {
                    break;
                }
                continue;
            }
            match line.as_bytes()[0] {
                b'#' => {}
                b'a' => {
                    if header.is_some() {
                        return self.fail("alignment block not terminated by a blank line".into());
                    }
                    match parse_a_line(line) {
                        Ok(h) => header = Some(h),
                        Err(e) => return self.fail(e),
                    }
                }
                b's' => {
                    if header.is_none() {
                        return self.fail("'s' line outside an alignment block".into());
                    }
                    match parse_s_line(line) {
                        Ok(s) => seqs.push(s),
                        Err(e) => return self.fail(e),
                    }
                }
                _ => {}
            }
        }

        let Some(h) = header else {
            self.done = true;
            return None;
        };
        if seqs.len() != 2 {
            return self.fail(format!(
                "alignment block has {} sequence line(s), expected 2",
                seqs.len()
            ));
        }
        let query = seqs.pop()?;
        let subject = seqs.pop()?;
        Some(Ok(AlignmentRecord {
            q_name: query.name,
            q_start: query.start,
            q_aln_len: query.aln_len,
            q_strand: query.strand,
            q_len: query.len,
            s_name: subject.name,
            s_start: subject.start,
            s_aln_len: subject.aln_len,
            s_strand: subject.strand,
            s_len: subject.len,
            score: h.score,
            e_value: h.e_value,
            eg2: h.eg2,
        }))
    }
}

fn parse_a_line(line: &str) -> Result<BlockHeader, String> {
    let mut score = None;
    let mut eg2 = None;
    let mut e_value = None;
    for field in line.split_whitespace().skip(1) {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        let parsed = || {
            value
                .parse::<f64>()
                .map_err(|_| format!("invalid {} value '{}'", key, value))
        };
        match key {
            "score" => score = Some(parsed()?),
            "EG2" => eg2 = Some(parsed()?),
            "E" => e_value = Some(parsed()?),
            _ => {}
        }
    }
    Ok(BlockHeader {
        score: score.ok_or("'a' line has no score")?,
        eg2,
        e_value: e_value.ok_or("'a' line has no E value (run lastal with -D or a database)")?,
    })
}

fn parse_s_line(line: &str) -> Result<SeqLine, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 7 {
        return Err(format!("'s' line has {} fields, expected 7", fields.len()));
    }
    let num = |i: usize, what: &str| {
        fields[i]
            .parse::<u64>()
            .map_err(|_| format!("invalid {} '{}'", what, fields[i]))
    };
    Ok(SeqLine {
        name: fields[1].to_string(),
        start: num(2, "start")?,
        aln_len: num(3, "alignment size")?,
        strand: Strand::parse(fields[4])?,
        len: num(5, "sequence size")?,
    })
}

/// A MAF file read as restartable, finite chunks. Every call to `chunks`
/// reopens the file.
#[derive(Debug, Clone)]
pub struct AlignmentSource {
    path: PathBuf,
    chunk_size: usize,
}

impl AlignmentSource {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Open a record reader; `.gz` files are decompressed transparently.
    pub fn records(&self) -> Result<MafReader<Box<dyn BufRead>>, String> {
        let file = File::open(&self.path)
            .map_err(|e| format!("cannot open {}: {}", self.path.display(), e))?;
        let gz = self.path.extension().is_some_and(|ext| ext == "gz");
        let reader: Box<dyn BufRead> = if gz {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(MafReader::new(reader, self.path.display().to_string()))
    }

    pub fn chunks(&self) -> Result<MafChunks, String> {
        Ok(MafChunks {
            records: self.records()?,
            chunk_size: self.chunk_size,
        })
    }

    /// Materialize every record. Only for inputs known to be small.
    pub fn read_all(&self) -> Result<Vec<AlignmentRecord>, String> {
        self.records()?.collect()
    }
}

/// Iterator of record chunks of at most `chunk_size` records. A parse error
/// is yielded once and ends the stream.
pub struct MafChunks {
    records: MafReader<Box<dyn BufRead>>,
    chunk_size: usize,
}

impl Iterator for MafChunks {
    type Item = Result<Vec<AlignmentRecord>, String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut chunk = Vec::with_capacity(self.chunk_size.min(DEFAULT_CHUNK_SIZE));
        for item in self.records.by_ref() {
            match item {
                Ok(r) => {
                    chunk.push(r);
                    if chunk.len() == self.chunk_size {
                        break;
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const MAF: &str = "\
# LAST version 1409
#
a score=250 EG2=1.2e-20 E=3.4e-30
s db|P12345   10 120 + 400 MKV---LLA
s txome.1     33 360 - 900 MKVAAALLA
q txome.1                  ~~~~~~~~~

a score=99 E=0
s db|Q99999    0  80 + 200 ACDEFGHIK
s ref|A0A001   5  80 + 150 ACDEFGHIK

a score=40 EG2=3 E=1e-3
s db|P12345    0  30 + 400 WWWWWWWWW
s txome.2      0  90 + 300 WWWWWWWWW
";

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_cr011_parse_blocks() {
        let records: Vec<_> = MafReader::new(MAF.as_bytes(), "mem")
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 3);
        let first = &records[0];
        assert_eq!(first.s_name, "db|P12345");
        assert_eq!(first.q_name, "txome.1");
        assert_eq!(first.q_aln_len, 360);
        assert_eq!(first.q_strand, Strand::Reverse);
        assert_eq!(first.q_len, 900);
        assert_eq!(first.s_len, 400);
        assert_eq!(first.eg2, Some(1.2e-20));
        assert_eq!(first.e_value, 3.4e-30);
        assert_eq!(records[1].e_value, 0.0);
        assert!(records[1].eg2.is_none());
    }

    #[test]
    fn test_cr011_missing_e_is_error() {
        let maf = "a score=10\ns a 0 5 + 10 AAAAA\ns b 0 5 + 10 AAAAA\n";
        let err = MafReader::new(maf.as_bytes(), "mem").next().unwrap().unwrap_err();
        assert!(err.contains("no E value"));
        assert!(err.starts_with("mem:1:"));
    }

    #[test]
    fn test_cr011_wrong_sequence_count() {
        let maf = "a score=10 E=1\ns a 0 5 + 10 AAAAA\n\n";
        let mut reader = MafReader::new(maf.as_bytes(), "mem");
        let err = reader.next().unwrap().unwrap_err();
        assert!(err.contains("1 sequence line(s)"));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_cr011_bad_number() {
        let maf = "a score=10 E=1\ns a zero 5 + 10 AAAAA\ns b 0 5 + 10 AAAAA\n";
        let err = MafReader::new(maf.as_bytes(), "mem").next().unwrap().unwrap_err();
        assert!(err.contains("invalid start 'zero'"));
    }

    #[test]
    fn test_cr011_chunks_bounded_and_restartable() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "x.maf", MAF);
        let source = AlignmentSource::new(&path, 2);
        let sizes: Vec<usize> = source.chunks().unwrap().map(|c| c.unwrap().len()).collect();
        assert_eq!(sizes, vec![2, 1]);
        let again: Vec<usize> = source.chunks().unwrap().map(|c| c.unwrap().len()).collect();
        assert_eq!(again, sizes);
    }

    #[test]
    fn test_cr011_empty_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "empty.maf", "# LAST version 1409\n");
        let source = AlignmentSource::new(&path, DEFAULT_CHUNK_SIZE);
        assert_eq!(source.chunks().unwrap().count(), 0);
        assert!(source.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_cr011_gzip_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.maf.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(MAF.as_bytes()).unwrap();
        enc.finish().unwrap();
        let records = AlignmentSource::new(&path, 10).read_all().unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_cr011_error_ends_chunk_stream() {
        let dir = tempfile::tempdir().unwrap();
        let bad = format!("{}\na score=1 E=1\ns only 0 1 + 1 A\n", MAF);
        let path = write(dir.path(), "bad.maf", &bad);
        let mut chunks = AlignmentSource::new(&path, 100).chunks().unwrap();
        assert!(chunks.next().unwrap().is_err());
        assert!(chunks.next().is_none());
    }

    #[test]
    fn test_cr011_missing_file() {
        let err = AlignmentSource::new("/nonexistent/x.maf", 10).chunks().err().unwrap();
        assert!(err.contains("cannot open"));
    }
}
