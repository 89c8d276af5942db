use std::{fs::File, io::Write, num::NonZeroUsize, path::Path};

use anyhow::Context;
use compress_io::compress::CompressIo;
use noodles::{
    bam, bgzf,
    sam::alignment::record::data::field::{Tag, Value},
};

use crate::{output::staging_path, stats::ReadStatsCollector, stats::SampleSummary};

type BamReader = bam::io::Reader<bgzf::MultithreadedReader<File>>;

/// Open a BAM file with a BGZF decoder using the given number of threads and
/// skip past the header
fn open_bam(path: &Path, threads: usize) -> anyhow::Result<BamReader> {
    debug!(
        "Opening BAM file {} with {} decoding threads",
        path.display(),
        threads
    );
    let file = File::open(path)
        .with_context(|| format!("Failed to open input file {}", path.display()))?;
    let workers = NonZeroUsize::new(threads).unwrap_or(NonZeroUsize::MIN);
    let mut reader = bam::io::Reader::from(bgzf::MultithreadedReader::with_worker_count(
        workers, file,
    ));
    reader
        .read_header()
        .with_context(|| format!("Could not read BAM header from {}", path.display()))?;
    Ok(reader)
}

fn int_tag(record: &bam::Record, tag: &Tag) -> Option<i64> {
    match record.data().get(tag) {
        Some(Ok(v)) => v.as_int(),
        _ => None,
    }
}

fn float_tag(record: &bam::Record, tag: &Tag) -> Option<f32> {
    match record.data().get(tag) {
        Some(Ok(Value::Float(x))) => Some(x),
        _ => None,
    }
}

/// Write all reads of a BAM file as FASTA.  Returns the number of reads written.
///
/// Output goes to a staging file that is renamed to `output` only once
/// all reads have been written.
pub fn bam_to_fasta(input: &Path, output: &Path, threads: usize) -> anyhow::Result<usize> {
    let mut reader = open_bam(input, threads)?;
    let tmp = staging_path(output);
    let mut n = 0;
    {
        let mut wrt = CompressIo::new()
            .path(&tmp)
            .bufwriter()
            .with_context(|| format!("Could not open output file {}", tmp.display()))?;
        let mut seq = Vec::new();
        for rec in reader.records() {
            let record = rec.with_context(|| {
                format!("Error reading record {} from {}", n + 1, input.display())
            })?;
            n += 1;
            seq.clear();
            seq.extend(record.sequence().iter());
            wrt.write_all(b">")?;
            match record.name() {
                Some(name) => wrt.write_all(name.as_ref())?,
                None => write!(wrt, "read_{}", n)?,
            }
            wrt.write_all(b"\n")?;
            wrt.write_all(&seq)?;
            wrt.write_all(b"\n")?;
        }
        wrt.flush()
            .with_context(|| format!("Error writing to {}", tmp.display()))?;
    }
    std::fs::rename(&tmp, output)
        .with_context(|| format!("Could not move {} to {}", tmp.display(), output.display()))?;
    debug!(
        "Wrote {} reads from {} to {}",
        n,
        input.display(),
        output.display()
    );
    Ok(n)
}

/// Stream all records of a BAM file and compute the QC summary for sample
pub fn sample_summary(input: &Path, sample: &str, threads: usize) -> anyhow::Result<SampleSummary> {
    let mut reader = open_bam(input, threads)?;
    let np = Tag::from([b'n', b'p']);
    let rq = Tag::from([b'r', b'q']);
    let mut coll = ReadStatsCollector::new();
    let mut seq = Vec::new();
    for rec in reader.records() {
        let record = rec.with_context(|| {
            format!(
                "Error reading record {} from {}",
                coll.n_reads() + 1,
                input.display()
            )
        })?;
        seq.clear();
        seq.extend(record.sequence().iter());
        let passes = int_tag(&record, &np).and_then(|x| u32::try_from(x).ok());
        coll.add_read(&seq, passes, float_tag(&record, &rq));
    }
    debug!("Read {} records from {}", coll.n_reads(), input.display());
    Ok(coll.finish(sample))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{fs::File, path::Path};

    use noodles::{
        bam,
        sam::{
            self,
            alignment::{
                io::Write as _,
                record::{data::field::Tag, Flags},
                record_buf::{data::field::Value, QualityScores, Sequence},
                RecordBuf,
            },
        },
    };

    /// A read for a test BAM file: (name, sequence, np tag)
    pub type TestRead<'a> = (&'a str, &'a str, Option<i32>);

    /// Write an unaligned BAM file with the given reads
    pub fn write_bam(path: &Path, reads: &[TestRead]) {
        let header = sam::Header::default();
        let mut wrt = bam::io::Writer::new(File::create(path).unwrap());
        wrt.write_header(&header).unwrap();
        for (name, seq, np) in reads {
            let mut builder = RecordBuf::builder()
                .set_name(*name)
                .set_flags(Flags::UNMAPPED)
                .set_sequence(Sequence::from(seq.as_bytes().to_vec()))
                .set_quality_scores(QualityScores::from(vec![30; seq.len()]));
            if let Some(x) = np {
                let data = [(Tag::from([b'n', b'p']), Value::from(*x))]
                    .into_iter()
                    .collect();
                builder = builder.set_data(data);
            }
            wrt.write_alignment_record(&header, &builder.build()).unwrap();
        }
        wrt.finish(&header).unwrap();
    }
}
