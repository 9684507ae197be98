//! Agency bet file.
//!
//! One bet per line, headerless, comma separated:
//! `first_name,last_name,dni,birth_date,number`. Blank lines are ignored and
//! malformed rows are skipped with a warning so one bad line does not sink a
//! whole run. Field lengths are checked later, when a batch is encoded.

use std::{io, path::Path};

use tracing::{debug, warn};

use crate::codec::BetRecord;

const COLUMNS: usize = 5;

/// Parse bet rows from `input`, skipping malformed ones.
#[must_use]
pub fn parse_records(input: &str) -> Vec<BetRecord> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| {
            let record = parse_line(line);
            if record.is_none() {
                warn!(line = index + 1, "action: parse_record | result: fail");
            }
            record
        })
        .collect()
}

fn parse_line(line: &str) -> Option<BetRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [first_name, last_name, dni, birth_date, number] = <[&str; COLUMNS]>::try_from(fields).ok()?;
    let number = number.parse().ok()?;
    Some(BetRecord::new(first_name, last_name, dni, birth_date, number))
}

/// Read and parse the bet file at `path`.
///
/// # Errors
/// Returns the I/O error raised while reading the file.
pub async fn load_records(path: impl AsRef<Path>) -> io::Result<Vec<BetRecord>> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path).await?;
    let records = parse_records(&contents);
    debug!(path = %path.display(), count = records.len(), "action: load_records | result: success");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;
    use tempfile::NamedTempFile;

    use super::*;

    #[rstest]
    fn parses_trimmed_rows() {
        let records = parse_records("Juan, Perez ,30904465,1999-03-17,7574\n\nAna,Gomez,40111222,2001-12-01,12\n");
        assert_eq!(
            records,
            vec![
                BetRecord::new("Juan", "Perez", "30904465", "1999-03-17", 7574),
                BetRecord::new("Ana", "Gomez", "40111222", "2001-12-01", 12),
            ]
        );
    }

    #[rstest]
    #[case("Juan,Perez,30904465,1999-03-17")]
    #[case("Juan,Perez,30904465,1999-03-17,7574,extra")]
    #[case("Juan,Perez,30904465,1999-03-17,seven")]
    #[case("Juan,Perez,30904465,1999-03-17,-1")]
    fn skips_malformed_rows(#[case] bad: &str) {
        let input = format!("{bad}\nAna,Gomez,40111222,2001-12-01,12\n");
        let records = parse_records(&input);
        assert_eq!(records.len(), 1);
        assert_eq!(records.first().map(|r| r.number), Some(12));
    }

    #[rstest]
    fn keeps_oversized_fields_for_the_encoder_to_reject() {
        let long = "x".repeat(300);
        let records = parse_records(&format!("{long},Perez,1,1999-03-17,1"));
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "Juan,Perez,30904465,1999-03-17,7574").expect("write");
        let records = load_records(file.path()).await.expect("load");
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load_records(dir.path().join("absent.csv"))
            .await
            .expect_err("missing");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
