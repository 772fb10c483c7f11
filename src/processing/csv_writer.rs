use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Scientific notation used for every floating-point field.
pub fn sci(x: f64) -> String {
    format!("{:.15e}", x)
}

/// Write data to CSV file with headers
pub fn write_csv<P: AsRef<Path>>(path: P, headers: &[&str], data: &[Vec<f64>]) -> io::Result<()> {
    if !headers.is_empty() && !data.is_empty() && headers.len() != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "Headers count ({}) doesn't match data columns ({})",
                headers.len(),
                data.len()
            ),
        ));
    }

    let mut file = BufWriter::new(File::create(path)?);

    writeln!(file, "{}", headers.join(","))?;

    let n_rows = data.iter().map(|col| col.len()).max().unwrap_or(0);

    for i in 0..n_rows {
        let row: Vec<String> = data
            .iter()
            .map(|col| if i < col.len() { sci(col[i]) } else { String::new() })
            .collect();
        writeln!(file, "{}", row.join(","))?;
    }

    file.flush()
}

/// Write x-y data pairs
pub fn write_xy<P: AsRef<Path>>(
    path: P,
    x_header: &str,
    y_header: &str,
    x_data: &[f64],
    y_data: &[f64],
) -> io::Result<()> {
    if x_data.len() != y_data.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "X and Y data lengths don't match ({} vs {})",
                x_data.len(),
                y_data.len()
            ),
        ));
    }
    write_csv(
        path,
        &[x_header, y_header],
        &[x_data.to_vec(), y_data.to_vec()],
    )
}

/// Row-at-a-time CSV output for tables that grow while a particle is tracked.
pub struct CsvStream {
    writer: BufWriter<File>,
    columns: usize,
}

impl CsvStream {
    pub fn create<P: AsRef<Path>>(path: P, headers: &[&str]) -> io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{}", headers.join(","))?;
        Ok(Self {
            writer,
            columns: headers.len(),
        })
    }

    /// Open an existing table for appending; the header is written only if the file is new.
    pub fn append<P: AsRef<Path>>(path: P, headers: &[&str]) -> io::Result<Self> {
        let path = path.as_ref();
        let fresh = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if fresh {
            writeln!(writer, "{}", headers.join(","))?;
        }
        Ok(Self {
            writer,
            columns: headers.len(),
        })
    }

    pub fn write_row<I, S>(&mut self, fields: I) -> io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields: Vec<S> = fields.into_iter().collect();
        if self.columns > 0 && fields.len() != self.columns {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Row has {} fields, table has {} columns",
                    fields.len(),
                    self.columns
                ),
            ));
        }
        let row: Vec<&str> = fields.iter().map(AsRef::as_ref).collect();
        writeln!(self.writer, "{}", row.join(","))
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("columns.csv");
        let headers = &["x", "y", "z"];
        let data = vec![
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ];

        write_csv(&path, headers, &data).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("x,y,z\n"));
        assert_eq!(content.lines().count(), 4);
    }

    #[test]
    fn stream_checks_row_width_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");
        {
            let mut table = CsvStream::create(&path, &["a", "b"]).unwrap();
            table.write_row(["1", "2"]).unwrap();
            assert!(table.write_row(["1"]).is_err());
            table.flush().unwrap();
        }
        {
            let mut table = CsvStream::append(&path, &["a", "b"]).unwrap();
            table.write_row([sci(0.5), sci(1.5)]).unwrap();
            table.flush().unwrap();
        }
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "a,b");
        assert_eq!(lines[2], "5.000000000000000e-1,1.500000000000000e0");
    }
}
