//! Readers for the whitespace-delimited input tables

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ndarray::Array2;

use crate::data::{CountMatrix, Peak, SampleMetadata, SampleRecord};
use crate::error::{AtacError, Result};

/// Columns before the first sample column: chromosome, start, end
const PEAK_COLUMNS: usize = 3;

/// Non-blank lines with their 1-based line numbers
fn content_lines<R: BufRead>(reader: R) -> impl Iterator<Item = (usize, std::io::Result<String>)> {
    reader.lines().enumerate().filter_map(|(i, line)| match line {
        Ok(l) if l.trim().is_empty() => None,
        other => Some((i + 1, other)),
    })
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Read a peak count table.
///
/// Header: three identifier columns then one column per sample. Each row:
/// `chrom start end count...`.
pub fn read_count_table<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let matrix = parse_count_table(BufReader::new(file))?;
    log::info!(
        "Loaded {} peaks x {} samples from {}",
        matrix.n_peaks(),
        matrix.n_samples(),
        path.display()
    );
    Ok(matrix)
}

pub fn parse_count_table<R: BufRead>(reader: R) -> Result<CountMatrix> {
    let mut lines = content_lines(reader);

    let (_, header_line) = lines
        .next()
        .ok_or_else(|| AtacError::format("count table is empty"))?;
    let header_line = header_line?;
    // BED-style headers may start with '#'
    let header: Vec<&str> = header_line.trim_start().trim_start_matches('#').split_whitespace().collect();
    if header.len() <= PEAK_COLUMNS {
        return Err(AtacError::format(format!(
            "count table header has {} columns; expected chrom, start, end and at least one sample",
            header.len()
        )));
    }
    let sample_ids: Vec<String> = header[PEAK_COLUMNS..].iter().map(|s| s.to_string()).collect();
    let n_samples = sample_ids.len();

    let mut peaks: Vec<Peak> = Vec::new();
    let mut values: Vec<f64> = Vec::new();

    for (line_no, line) in lines {
        let line = line?;
        if is_comment(&line) {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != n_samples + PEAK_COLUMNS {
            return Err(AtacError::format(format!(
                "line {}: {} columns, header has {}",
                line_no,
                fields.len(),
                n_samples + PEAK_COLUMNS
            )));
        }

        let coordinate = |s: &str| {
            s.parse::<u64>().map_err(|_| {
                AtacError::format(format!(
                    "line {}: '{}' is not an integer coordinate (are chrom, start, end the first columns?)",
                    line_no, s
                ))
            })
        };
        let start = coordinate(fields[1])?;
        let end = coordinate(fields[2])?;
        peaks.push(Peak::new(fields[0], start, end)?);

        for raw in &fields[PEAK_COLUMNS..] {
            let value = raw.parse::<f64>().map_err(|_| {
                AtacError::format(format!("line {}: invalid count '{}'", line_no, raw))
            })?;
            values.push(value);
        }
    }

    if peaks.is_empty() {
        return Err(AtacError::format("count table has no peak rows"));
    }

    let counts = Array2::from_shape_vec((peaks.len(), n_samples), values).map_err(|e| {
        AtacError::format(format!("count table shape: {}", e))
    })?;
    CountMatrix::new(counts, peaks, sample_ids)
}

/// Read the sample table: no header, exactly `sample cell_type donor` per row
pub fn read_metadata_table<P: AsRef<Path>>(path: P) -> Result<SampleMetadata> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let metadata = parse_metadata_table(BufReader::new(file))?;
    log::info!("Loaded metadata for {} samples from {}", metadata.n_samples(), path.display());
    Ok(metadata)
}

pub fn parse_metadata_table<R: BufRead>(reader: R) -> Result<SampleMetadata> {
    let mut records = Vec::new();
    for (line_no, line) in content_lines(reader) {
        let line = line?;
        if is_comment(&line) {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [sample, cell_type, donor] => records.push(SampleRecord::new(*sample, *cell_type, *donor)),
            _ => {
                return Err(AtacError::format(format!(
                    "metadata line {}: expected 3 columns (sample cell_type donor), found {}",
                    line_no,
                    fields.len()
                )))
            }
        }
    }
    if records.is_empty() {
        return Err(AtacError::format("metadata table has no samples"));
    }
    SampleMetadata::new(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_count_table() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "#chrom\tstart\tend\tA1\tA2\tB1").unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "chr1\t100\t600\t10\t20\t30").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "chr2  5000 5400   0 1   2").unwrap();

        let matrix = read_count_table(file.path()).unwrap();
        assert_eq!(matrix.n_peaks(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.sample_ids(), &["A1", "A2", "B1"]);
        assert_eq!(matrix.peaks()[1], Peak::new("chr2", 5000, 5400).unwrap());
        assert_eq!(matrix.peak_counts(0).to_vec(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_short_header_rejected() {
        let result = parse_count_table(Cursor::new("chrom start end\nchr1 1 2\n"));
        assert!(matches!(result, Err(AtacError::Format { .. })));
    }

    #[test]
    fn test_ragged_row_rejected() {
        let text = "chrom start end s1 s2\nchr1 1 50 3 4\nchr1 60 90 3\n";
        let err = parse_count_table(Cursor::new(text)).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_missing_coordinates_rejected() {
        // a name column pushes the coordinates out of place
        let text = "name chrom start s1\npeak_1 chr1 100 5\n";
        assert!(matches!(parse_count_table(Cursor::new(text)), Err(AtacError::Format { .. })));
    }

    #[test]
    fn test_bad_counts_rejected() {
        let not_a_number = "chrom start end s1\nchr1 1 50 abc\n";
        assert!(matches!(
            parse_count_table(Cursor::new(not_a_number)),
            Err(AtacError::Format { .. })
        ));
        let fractional = "chrom start end s1\nchr1 1 50 2.5\n";
        assert!(matches!(
            parse_count_table(Cursor::new(fractional)),
            Err(AtacError::Format { .. })
        ));
        let reversed = "chrom start end s1\nchr1 80 50 2\n";
        assert!(matches!(
            parse_count_table(Cursor::new(reversed)),
            Err(AtacError::Format { .. })
        ));
    }

    #[test]
    fn test_duplicate_sample_columns_rejected() {
        let text = "chrom start end s1 s1\nchr1 1 50 2 3\n";
        assert!(matches!(parse_count_table(Cursor::new(text)), Err(AtacError::Format { .. })));
    }

    #[test]
    fn test_read_metadata_table() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "A1 Bcell donor1").unwrap();
        writeln!(file, "A2\tBcell\tdonor2").unwrap();
        writeln!(file, "B1 Tcell donor1").unwrap();

        let metadata = read_metadata_table(file.path()).unwrap();
        assert_eq!(metadata.n_samples(), 3);
        assert_eq!(metadata.get("A2").unwrap().donor, "donor2");
    }

    #[test]
    fn test_metadata_width_enforced() {
        let result = parse_metadata_table(Cursor::new("s1 Bcell\n"));
        assert!(matches!(result, Err(AtacError::Format { .. })));
        let result = parse_metadata_table(Cursor::new("s1 Bcell d1 extra\n"));
        assert!(matches!(result, Err(AtacError::Format { .. })));
    }

    #[test]
    fn test_duplicate_metadata_sample_rejected() {
        let result = parse_metadata_table(Cursor::new("s1 B d1\ns1 T d2\n"));
        assert!(matches!(result, Err(AtacError::Format { .. })));
    }
}
