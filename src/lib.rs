//! Writer for serial XML VTK files with binary appended data.
//!
//! Files are written in the XML VTK format for image data (`.vti`), rectilinear grids
//! (`.vtr`), structured grids (`.vts`) and unstructured grids (`.vtu`). All data arrays are
//! stored in a single appended section at the end of the file, which keeps the files compact
//! while leaving the XML headers human readable.
//!
//! The main entry point is [`writer::VtkFile`]. Series of files can be tied together with a
//! `.pvd` collection using [`group::VtkGroup`], and non-uniform time values can be recorded in a
//! companion grid with [`time::create_time_values`].
//!
//! # Examples
//!
//! Write a single line segment with a scalar attached to its end points:
//!
//! ```no_run
//! use vtkwrite::model::*;
//! use vtkwrite::writer::{GridGeometry, Location, PieceGeometry, Section, VtkFile};
//!
//! # fn main() -> Result<(), vtkwrite::Error> {
//! let points = Payload::xyz(vec![0.0f64, 1.0], vec![0.0f64; 2], vec![0.0f64; 2])?;
//! let cells = [
//!     Payload::from(vec![0i32, 1]),
//!     Payload::from(vec![2i32]),
//!     Payload::from(cell_types_buffer(&[CellType::Line])),
//! ];
//! let fields = vec![Field::scalars("temp", vec![20.0f64, 25.0])?];
//!
//! let mut vtk = VtkFile::create("segment", GridKind::UnstructuredGrid)?;
//! vtk.add_comments(["A single line segment"])?;
//! vtk.open_grid(&GridGeometry::unstructured())?
//!     .open_piece(&PieceGeometry::counts(2, 1))?;
//!
//! vtk.open_element(Section::Points)?;
//! let points_handle = vtk.add_data("points", &points)?;
//! vtk.close_element(Section::Points)?;
//!
//! vtk.open_element(Section::Cells)?;
//! let mut cell_handles = Vec::new();
//! for (name, data) in ["connectivity", "offsets", "types"].iter().zip(&cells) {
//!     cell_handles.push(vtk.add_data(name, data)?);
//! }
//! vtk.close_element(Section::Cells)?;
//!
//! let field_handles = vtk.declare_fields(Location::Point, &fields, None)?;
//! vtk.close_piece()?.close_grid()?;
//!
//! vtk.append(points_handle, &points)?;
//! for (handle, data) in cell_handles.into_iter().zip(&cells) {
//!     vtk.append(handle, data)?;
//! }
//! vtk.append_fields(field_handles, &fields)?;
//! vtk.save()?;
//! # Ok(())
//! # }
//! ```

pub mod group;
pub mod model;
pub mod time;
pub mod writer;
pub mod xml;

use std::io;

pub use group::VtkGroup;
pub use writer::{Encoding, Options, VtkFile};

/// Error type for all writing operations.
#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    XML(xml::Error),
    Model(model::Error),
    Write(writer::Error),
    Group(group::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IO(source) => write!(f, "IO error: {:?}", source),
            Error::XML(source) => write!(f, "XML error: {}", source),
            Error::Model(source) => write!(f, "Invalid data: {}", source),
            Error::Write(source) => write!(f, "Write error: {}", source),
            Error::Group(source) => write!(f, "Collection error: {}", source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(source) => Some(source),
            Error::XML(source) => Some(source),
            Error::Model(source) => Some(source),
            Error::Write(source) => Some(source),
            Error::Group(source) => Some(source),
        }
    }
}

/// Convert `std::io` error into `vtkwrite` error.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::IO(e)
    }
}

/// Convert [`xml::Error`] into the top level `vtkwrite` error.
impl From<xml::Error> for Error {
    fn from(e: xml::Error) -> Error {
        Error::XML(e)
    }
}

impl From<model::Error> for Error {
    fn from(e: model::Error) -> Error {
        Error::Model(e)
    }
}

/// Convert [`writer::Error`] into the top level `vtkwrite` error.
impl From<writer::Error> for Error {
    fn from(e: writer::Error) -> Error {
        Error::Write(e)
    }
}

impl From<group::Error> for Error {
    fn from(e: group::Error) -> Error {
        Error::Group(e)
    }
}

/// Convert `vtkwrite` error into `std::io` error.
impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::IO(e) => e,
            Error::Write(writer::Error::IO(e)) => e,
            _ => io::Error::new(io::ErrorKind::Other, format!("{}", err)),
        }
    }
}
