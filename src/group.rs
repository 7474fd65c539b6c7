//!
//! Writer for `.pvd` collection files.
//!
//! A collection lists previously written VTK files, each tagged with a simulation time, so that
//! they can be opened together as a time series.
//!

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::writer::FILE_VERSION;
use crate::xml::{self, XmlWriter};

/// Extension of collection files.
pub const EXTENSION: &str = ".pvd";

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    XML(xml::Error),
    /// A referenced file path cannot be written as ASCII text.
    InvalidPath(PathBuf),
    /// The collection was already saved.
    AlreadySaved,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IO(source) => write!(f, "IO error: {:?}", source),
            Error::XML(source) => write!(f, "XML error: {}", source),
            Error::InvalidPath(path) => write!(f, "Path cannot be stored in a collection: {:?}", path),
            Error::AlreadySaved => write!(f, "Collection was already saved"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(source) => Some(source),
            Error::XML(source) => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::IO(e)
    }
}

impl From<xml::Error> for Error {
    fn from(e: xml::Error) -> Error {
        Error::XML(e)
    }
}

/// A `.pvd` collection being written.
#[derive(Debug)]
pub struct VtkGroup<W: Write> {
    xml: XmlWriter<W>,
    /// Directory entries are made relative to.
    base_dir: Option<PathBuf>,
    file_path: Option<PathBuf>,
    num_entries: usize,
    saved: bool,
}

impl VtkGroup<BufWriter<File>> {
    /// Create the collection file `path` with `.pvd` appended.
    ///
    /// Entries located under the directory of the collection are stored relative to it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut file_path = path.as_ref().as_os_str().to_owned();
        file_path.push(EXTENSION);
        let file_path = PathBuf::from(file_path);
        debug!("Creating collection {:?}", file_path);
        let file = File::create(&file_path)?;
        let mut group = VtkGroup::new(BufWriter::new(file))?;
        group.base_dir = Some(
            file_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        );
        group.file_path = Some(file_path);
        Ok(group)
    }

    /// Finish the collection and close the file, returning its path.
    pub fn save(&mut self) -> Result<PathBuf, Error> {
        let stream = self.finish()?;
        stream.into_inner().map_err(|e| Error::IO(e.into_error()))?;
        let path = self.file_path.clone().unwrap_or_default();
        debug!("Saved collection {:?} with {} entries", path, self.num_entries);
        Ok(path)
    }
}

impl<W: Write> VtkGroup<W> {
    /// Start a collection on an arbitrary stream. Entry paths are written as given.
    pub fn new(stream: W) -> Result<Self, Error> {
        let mut xml = XmlWriter::with_declaration(stream)?;
        xml.open_element("VTKFile")?
            .add_attribute("type", "Collection")?
            .add_attribute("version", FILE_VERSION)?
            .add_attribute("byte_order", "LittleEndian")?;
        xml.open_element("Collection")?;
        Ok(VtkGroup {
            xml,
            base_dir: None,
            file_path: None,
            num_entries: 0,
            saved: false,
        })
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// Path of the collection file, if it was created from a path.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Reference `path` at simulation time `sim_time`, with an empty group and part zero.
    pub fn add_file(&mut self, path: impl AsRef<Path>, sim_time: f64) -> Result<&mut Self, Error> {
        self.write_entry(path.as_ref(), sim_time, None, 0)
    }

    /// Reference `path` at simulation time `sim_time` as part `part` of group `group`.
    pub fn add_entry(
        &mut self,
        path: impl AsRef<Path>,
        sim_time: f64,
        group: u32,
        part: u32,
    ) -> Result<&mut Self, Error> {
        self.write_entry(path.as_ref(), sim_time, Some(group), part)
    }

    fn write_entry(
        &mut self,
        path: &Path,
        sim_time: f64,
        group: Option<u32>,
        part: u32,
    ) -> Result<&mut Self, Error> {
        if self.saved {
            return Err(Error::AlreadySaved);
        }
        let file = self.entry_path(path)?;
        let group = group.map(|g| g.to_string()).unwrap_or_default();
        self.xml
            .open_element("DataSet")?
            .add_attribute("timestep", sim_time)?
            .add_attribute("group", &group)?
            .add_attribute("part", part)?
            .add_attribute("file", &file)?
            .close_element(None)?;
        self.num_entries += 1;
        trace!("Added {:?} at time {} to collection", file, sim_time);
        Ok(self)
    }

    /// Path of an entry as stored in the collection.
    fn entry_path(&self, path: &Path) -> Result<String, Error> {
        let relative = self
            .base_dir
            .as_deref()
            .and_then(|base| path.strip_prefix(base).ok())
            .unwrap_or(path);
        match relative.to_str() {
            Some(s) if xml::check_value(s).is_ok() => Ok(s.to_string()),
            _ => Err(Error::InvalidPath(path.to_path_buf())),
        }
    }

    /// Close the collection and return the underlying stream.
    pub fn finish(&mut self) -> Result<W, Error> {
        if self.saved {
            return Err(Error::AlreadySaved);
        }
        self.xml
            .close_element(Some("Collection"))?
            .close_element(Some("VTKFile"))?;
        let stream = self.xml.close()?;
        self.saved = true;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_layout() -> Result<(), Error> {
        let mut group = VtkGroup::new(Vec::new())?;
        group.add_file("a.vtu", 0.0)?.add_entry("b.vtu", 0.5, 2, 1)?;
        assert_eq!(group.num_entries(), 2);
        let out = String::from_utf8(group.finish()?).unwrap();
        assert_eq!(
            out,
            "<?xml version=\"1.0\"?>\n\
             <VTKFile type=\"Collection\" version=\"0.1\" byte_order=\"LittleEndian\">\n\
             <Collection>\n\
             <DataSet timestep=\"0\" group=\"\" part=\"0\" file=\"a.vtu\"/>\n\
             <DataSet timestep=\"0.5\" group=\"2\" part=\"1\" file=\"b.vtu\"/>\n\
             </Collection>\n\
             </VTKFile>\n"
        );
        Ok(())
    }

    #[test]
    fn entries_are_relative_to_the_collection() -> Result<(), Error> {
        let mut group = VtkGroup::new(Vec::new())?;
        group.base_dir = Some(PathBuf::from("out/run"));
        assert_eq!(group.entry_path(Path::new("out/run/step0.vtu"))?, "step0.vtu");
        assert_eq!(group.entry_path(Path::new("other/step0.vtu"))?, "other/step0.vtu");
        assert!(matches!(
            group.entry_path(Path::new("out/a\"b.vtu")),
            Err(Error::InvalidPath(_))
        ));
        Ok(())
    }

    #[test]
    fn no_entries_after_save() -> Result<(), Error> {
        let mut group = VtkGroup::new(Vec::new())?;
        group.finish()?;
        assert!(matches!(group.add_file("a.vtu", 1.0), Err(Error::AlreadySaved)));
        assert!(matches!(group.finish(), Err(Error::AlreadySaved)));
        Ok(())
    }
}
