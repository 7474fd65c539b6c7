//!
//! Companion grid storing the literal time values of a time series.
//!
//! Time series written with [`GridGeometry::with_time_steps`] only carry step indices. The
//! companion file is a tiny self-contained unstructured grid holding one `TimeValue` cell array
//! per step, which lets viewers annotate each step with its actual, possibly non-uniform, time.
//!
//! [`GridGeometry::with_time_steps`]: crate::writer::GridGeometry::with_time_steps

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::model::{GridKind, Spaced};
use crate::writer::{Error, Section, FILE_VERSION};
use crate::xml::XmlWriter;

/// Name of the cell array holding the time values.
pub const TIME_VALUE: &str = "TimeValue";

/// Write the companion grid for the data file `associated_file` to `path` with `.vtu` appended.
pub fn create_time_values(
    path: impl AsRef<Path>,
    associated_file: &str,
    values: &[f64],
) -> Result<PathBuf, Error> {
    let mut file_path = path.as_ref().as_os_str().to_owned();
    file_path.push(GridKind::UnstructuredGrid.extension());
    let file_path = PathBuf::from(file_path);
    let file = File::create(&file_path)?;
    let stream = write_time_values(BufWriter::new(file), associated_file, values)?;
    stream.into_inner().map_err(|e| Error::IO(e.into_error()))?;
    debug!("Saved {} time values to {:?}", values.len(), file_path);
    Ok(file_path)
}

/// Write the companion grid as ASCII to `stream`, returning the stream.
pub fn write_time_values<W: Write>(
    stream: W,
    associated_file: &str,
    values: &[f64],
) -> Result<W, Error> {
    let mut xml = XmlWriter::with_declaration(stream)?;
    xml.open_element("VTKFile")?
        .add_attribute("type", GridKind::UnstructuredGrid)?
        .add_attribute("version", FILE_VERSION)?
        .add_attribute("byte_order", "LittleEndian")?;
    for comment in [
        "This is a fake grid, that is only used for plotting actual Time Values".to_string(),
        format!("See the associated file: {}", associated_file),
        "This .vtu file can be included in the Paraview pipeline.".to_string(),
        "Then use a Python Annotation Filter with this Expression: \"Time: %1.2f\" %TimeValue[0]"
            .to_string(),
        "Make sure the \"Array Association\" is set to \"Cell Data\"".to_string(),
        "This is useful when the time step spacing is not uniform.".to_string(),
        "Note: make sure to hide the fake grid.".to_string(),
    ] {
        xml.add_comment(&comment)?;
    }

    let steps: Vec<usize> = (0..values.len()).collect();
    xml.open_element(&GridKind::UnstructuredGrid.to_string())?
        .add_attribute("TimeValues", Spaced(steps.as_slice()))?;
    xml.open_element("Piece")?
        .add_attribute("NumberOfPoints", 2)?
        .add_attribute("NumberOfCells", 1)?;

    xml.open_element(Section::Points.tag())?;
    ascii_array(&mut xml, None, "Float32", Some(3), "0 0 0\n1 0 0")?;
    xml.close_element(Some(Section::Points.tag()))?;

    xml.open_element(Section::Cells.tag())?;
    ascii_array(&mut xml, Some("connectivity"), "Int32", None, "0 1")?;
    ascii_array(&mut xml, Some("offsets"), "Int32", None, "2")?;
    ascii_array(&mut xml, Some("types"), "UInt8", None, "3")?;
    xml.close_element(Some(Section::Cells.tag()))?;

    xml.open_element(Section::CellData.tag())?
        .add_attribute("scalars", TIME_VALUE)?;
    for (step, value) in values.iter().enumerate() {
        xml.open_element("DataArray")?
            .add_attribute("Name", TIME_VALUE)?
            .add_attribute("NumberOfComponents", 1)?
            .add_attribute("type", "Float64")?
            .add_attribute("format", "ascii")?
            .add_attribute("TimeStep", step)?
            .add_text(&value.to_string())?
            .close_element(Some("DataArray"))?;
    }
    xml.close_element(Some(Section::CellData.tag()))?;

    xml.close_element(Some("Piece"))?
        .close_element(Some(&GridKind::UnstructuredGrid.to_string()))?
        .close_element(Some("VTKFile"))?;
    Ok(xml.close()?)
}

fn ascii_array<W: Write>(
    xml: &mut XmlWriter<W>,
    name: Option<&str>,
    scalar_type: &str,
    num_comp: Option<u32>,
    text: &str,
) -> Result<(), Error> {
    xml.open_element("DataArray")?.add_attribute("type", scalar_type)?;
    if let Some(name) = name {
        xml.add_attribute("Name", name)?;
    }
    if let Some(n) = num_comp {
        xml.add_attribute("NumberOfComponents", n)?;
    }
    xml.add_attribute("format", "ascii")?
        .add_text(text)?
        .close_element(Some("DataArray"))?;
    Ok(())
}
