//! Text outputs written while a fit runs.
//!
//! Both files start with three `#` header lines naming the columns by
//! parameter name, component and group. Rows are appended by opening the
//! file, writing, and closing it again, so a crash only loses what was still
//! buffered.

use ndarray::Array1;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::optimizers::ChainSink;
use crate::parameters::ParameterKey;

fn write_header(path: &Path, keys: &[ParameterKey], leading: Option<&str>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    let pad = leading.map_or(String::new(), |l| format!("{} ", l));
    let column = |f: &dyn Fn(&ParameterKey) -> String| {
        keys.iter().map(f).collect::<Vec<_>>().join(" ")
    };
    writeln!(writer, "# name: {}{}", pad, column(&|k| k.name.clone()))?;
    writeln!(writer, "# component: {}{}", pad, column(&|k| k.component.clone()))?;
    writeln!(writer, "# group: {}{}", pad, column(&|k| k.group.to_string()))?;
    writer.flush()?;
    Ok(())
}

fn append(path: &Path) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(OpenOptions::new().append(true).create(true).open(path)?))
}

/// Buffered log of every objective evaluation.
///
/// One row per evaluation: the fitted values in registry order followed by
/// the chi-square.
#[derive(Debug)]
pub struct IterationLog {
    path: PathBuf,
    flush_every: usize,
    buffer: Vec<(Array1<f64>, f64)>,
    evaluations: usize,
}

impl IterationLog {
    /// Truncate `path` and write the header.
    pub fn create<P: AsRef<Path>>(path: P, keys: &[ParameterKey], flush_every: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        write_header(&path, keys, None)?;
        Ok(Self {
            path,
            flush_every: flush_every.max(1),
            buffer: Vec::new(),
            evaluations: 0,
        })
    }

    pub fn record(&mut self, x: &Array1<f64>, chi2: f64) -> Result<()> {
        self.buffer.push((x.clone(), chi2));
        self.evaluations += 1;
        if self.buffer.len() >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut writer = append(&self.path)?;
        for (x, chi2) in self.buffer.drain(..) {
            for value in x.iter() {
                write!(writer, "{:.12} ", value)?;
            }
            writeln!(writer, "{:.12}", chi2)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Evaluations recorded so far, flushed or not.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Chain file of the ensemble sampler.
///
/// After every step one row per walker is appended:
/// `walker value_1 ... value_n log_probability`.
#[derive(Debug)]
pub struct ChainFile {
    path: PathBuf,
}

impl ChainFile {
    pub fn create<P: AsRef<Path>>(path: P, keys: &[ParameterKey]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        write_header(&path, keys, Some("walker"))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChainSink for ChainFile {
    fn record(&mut self, _step: usize, walkers: &[Array1<f64>], log_probs: &[f64]) -> Result<()> {
        let mut writer = append(&self.path)?;
        for (k, (walker, lp)) in walkers.iter().zip(log_probs.iter()).enumerate() {
            write!(writer, "{}", k)?;
            for value in walker.iter() {
                write!(writer, " {:.12}", value)?;
            }
            writeln!(writer, " {:.12}", lp)?;
        }
        writer.flush()?;
        Ok(())
    }
}
