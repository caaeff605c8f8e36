use crate::core::grid::GridData;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Defines the interface for reading and writing grid function file formats.
///
/// Implementors handle format-specific parsing and serialization; the path based helpers
/// are provided on top of the reader/writer methods.
pub trait GridFile {
    /// The error type for I/O operations.
    type Error: Error + From<io::Error>;

    /// Reads a grid function from a buffered reader.
    ///
    /// # Arguments
    ///
    /// * `reader` - The buffered reader to read from.
    ///
    /// # Return
    ///
    /// Returns the parsed grid geometry with its point values and gradients.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails, the header is inconsistent, or I/O fails.
    fn read_from(reader: &mut impl BufRead) -> Result<GridData, Self::Error>;

    /// Writes a grid function to a writer.
    ///
    /// # Arguments
    ///
    /// * `grid` - The grid function to write.
    /// * `writer` - The writer to output to.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_to(grid: &GridData, writer: &mut impl Write) -> Result<(), Self::Error>;

    /// Reads a grid function from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or parsing fails.
    fn read_from_path<P: AsRef<Path>>(path: P) -> Result<GridData, Self::Error> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader)
    }

    /// Writes a grid function to a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or writing fails.
    fn write_to_path<P: AsRef<Path>>(grid: &GridData, path: P) -> Result<(), Self::Error> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Self::write_to(grid, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
