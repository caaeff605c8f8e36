use crate::core::grid::{GridAxis, GridCoordinates, GridData, GridError};
use crate::core::io::traits::GridFile;
use std::io::{self, BufRead, Write};
use thiserror::Error;

const SPACING_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum GridFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {kind}")]
    Parse {
        line: usize,
        kind: GridParseErrorKind,
    },
    #[error("Inconsistent data: {0}")]
    Inconsistency(String),
    #[error("Missing required record: {0}")]
    MissingRecord(String),
    #[error("Invalid grid: {0}")]
    Grid(#[from] GridError),
}

#[derive(Debug, Error)]
pub enum GridParseErrorKind {
    #[error("Invalid integer '{0}'")]
    InvalidInt(String),
    #[error("Invalid float '{0}'")]
    InvalidFloat(String),
    #[error("Invalid periodicity flag '{0}' (expected true or false)")]
    InvalidFlag(String),
    #[error("Expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("Unknown header record '{0}'")]
    UnknownRecord(String),
}

fn parse_float(line: usize, field: &str) -> Result<f64, GridFileError> {
    field.parse().map_err(|_| GridFileError::Parse {
        line,
        kind: GridParseErrorKind::InvalidFloat(field.to_string()),
    })
}

fn parse_int(line: usize, field: &str) -> Result<usize, GridFileError> {
    field.parse().map_err(|_| GridFileError::Parse {
        line,
        kind: GridParseErrorKind::InvalidInt(field.to_string()),
    })
}

fn parse_flag(line: usize, field: &str) -> Result<bool, GridFileError> {
    match field.to_ascii_lowercase().as_str() {
        "true" | "yes" => Ok(true),
        "false" | "no" => Ok(false),
        _ => Err(GridFileError::Parse {
            line,
            kind: GridParseErrorKind::InvalidFlag(field.to_string()),
        }),
    }
}

/// Plain-text grid persistence format.
///
/// ```text
/// #! DIMENSION 1
/// #! AXIS <min> <max> <bins> <periodic> <spacing>
/// <value> <d_0> ... <d_{D-1}>
/// ```
pub struct GridTextFile;

impl GridFile for GridTextFile {
    type Error = GridFileError;

    fn read_from(reader: &mut impl BufRead) -> Result<GridData, Self::Error> {
        let mut dimension: Option<usize> = None;
        let mut axes: Vec<GridAxis> = Vec::new();
        let mut values = Vec::new();
        let mut gradients = Vec::new();

        for (line_num, line_res) in reader.lines().enumerate() {
            let line_number = line_num + 1;
            let line = line_res?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(header) = trimmed.strip_prefix("#!") {
                let fields: Vec<&str> = header.split_whitespace().collect();
                match fields.first().copied() {
                    Some("DIMENSION") => {
                        if fields.len() != 2 {
                            return Err(GridFileError::Parse {
                                line: line_number,
                                kind: GridParseErrorKind::FieldCount {
                                    expected: 2,
                                    found: fields.len(),
                                },
                            });
                        }
                        dimension = Some(parse_int(line_number, fields[1])?);
                    }
                    Some("AXIS") => {
                        if fields.len() != 6 {
                            return Err(GridFileError::Parse {
                                line: line_number,
                                kind: GridParseErrorKind::FieldCount {
                                    expected: 6,
                                    found: fields.len(),
                                },
                            });
                        }
                        let min = parse_float(line_number, fields[1])?;
                        let max = parse_float(line_number, fields[2])?;
                        let bins = parse_int(line_number, fields[3])?;
                        let periodic = parse_flag(line_number, fields[4])?;
                        let spacing = parse_float(line_number, fields[5])?;
                        let axis = GridAxis::new(min, max, bins, periodic)?;
                        if (axis.spacing() - spacing).abs() > SPACING_TOLERANCE * axis.spacing() {
                            return Err(GridFileError::Inconsistency(format!(
                                "axis {} declares spacing {} but bounds and bins give {}",
                                axes.len(),
                                spacing,
                                axis.spacing()
                            )));
                        }
                        axes.push(axis);
                    }
                    Some(other) => {
                        return Err(GridFileError::Parse {
                            line: line_number,
                            kind: GridParseErrorKind::UnknownRecord(other.to_string()),
                        });
                    }
                    None => continue,
                }
                continue;
            }
            if trimmed.starts_with('#') {
                continue;
            }

            let dim = dimension
                .ok_or_else(|| GridFileError::MissingRecord("#! DIMENSION".to_string()))?;
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() != dim + 1 {
                return Err(GridFileError::Parse {
                    line: line_number,
                    kind: GridParseErrorKind::FieldCount {
                        expected: dim + 1,
                        found: fields.len(),
                    },
                });
            }
            values.push(parse_float(line_number, fields[0])?);
            for field in &fields[1..] {
                gradients.push(parse_float(line_number, field)?);
            }
        }

        let dim =
            dimension.ok_or_else(|| GridFileError::MissingRecord("#! DIMENSION".to_string()))?;
        if axes.len() != dim {
            return Err(GridFileError::Inconsistency(format!(
                "header declares {} dimensions but {} axes were given",
                dim,
                axes.len()
            )));
        }
        let coordinates = GridCoordinates::new(axes)?;
        if values.len() != coordinates.point_count() {
            return Err(GridFileError::Inconsistency(format!(
                "grid has {} points but the body holds {} lines",
                coordinates.point_count(),
                values.len()
            )));
        }
        Ok(GridData::new(coordinates, values, gradients)?)
    }

    fn write_to(grid: &GridData, writer: &mut impl Write) -> Result<(), Self::Error> {
        let coordinates = &grid.coordinates;
        let dim = coordinates.dimension();
        writeln!(writer, "#! DIMENSION {dim}")?;
        for axis in coordinates.axes() {
            writeln!(
                writer,
                "#! AXIS {} {} {} {} {}",
                axis.min,
                axis.max,
                axis.bins,
                axis.periodic,
                axis.spacing()
            )?;
        }
        for (point, value) in grid.values.iter().enumerate() {
            write!(writer, "{value}")?;
            for d in &grid.gradients[point * dim..(point + 1) * dim] {
                write!(writer, " {d}")?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}
