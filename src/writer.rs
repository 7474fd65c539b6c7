//!
//! Writer for serial XML VTK files storing all data arrays in the appended data section.
//!
//! A file is produced in two phases. First the XML structure is written, declaring a header for
//! every data array. Each declaration returns an [`ArrayHandle`] and records the size the array
//! will occupy in the appended section, which determines the `offset` of the next array. Once
//! the grid is closed, the payloads are appended by handing each handle back together with its
//! data, in declaration order.
//!
//! # Examples
//!
//! ```no_run
//! use vtkwrite::model::*;
//! use vtkwrite::writer::*;
//!
//! # fn main() -> Result<(), vtkwrite::Error> {
//! let points = Payload::xyz(vec![0.0f64, 1.0], vec![0.0f64, 0.0], vec![0.0f64, 0.0])?;
//! let connectivity = Payload::from(vec![0i32, 1]);
//! let offsets = Payload::from(vec![2i32]);
//! let types = Payload::from(cell_types_buffer(&[CellType::Line]));
//!
//! let mut vtk = VtkFile::create("line", GridKind::UnstructuredGrid)?;
//! vtk.open_grid(&GridGeometry::unstructured())?;
//! vtk.open_piece(&PieceGeometry::counts(2, 1))?;
//! vtk.open_element(Section::Points)?;
//! let points_handle = vtk.add_data("points", &points)?;
//! vtk.close_element(Section::Points)?;
//! vtk.open_element(Section::Cells)?;
//! let conn_handle = vtk.add_data("connectivity", &connectivity)?;
//! let offsets_handle = vtk.add_data("offsets", &offsets)?;
//! let types_handle = vtk.add_data("types", &types)?;
//! vtk.close_element(Section::Cells)?;
//! vtk.close_piece()?.close_grid()?;
//! vtk.append(points_handle, &points)?
//!     .append(conn_handle, &connectivity)?
//!     .append(offsets_handle, &offsets)?
//!     .append(types_handle, &types)?;
//! let path = vtk.save()?;
//! assert_eq!(path.to_str(), Some("line.vtu"));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{WriteBytesExt, LE};
use log::{debug, trace};

use crate::model::{self, ArrayDescriptor, Extent, Field, FieldKind, GridKind, Payload, Spaced};
use crate::xml::{self, XmlWriter};

/// Version written to the `version` attribute of the root element.
pub const FILE_VERSION: &str = "0.1";

/// Width in bytes of the length prefix preceding every appended block (`header_type="UInt32"`).
pub const HEADER_SIZE: usize = 4;

/// Number of elements open while inside a `Piece`: `VTKFile`, the grid element and `Piece`.
const PIECE_DEPTH: usize = 3;

/// Source of the ids tying array handles to the writer that issued them.
static NEXT_WRITER_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    XML(xml::Error),
    Model(model::Error),
    /// The operation is not allowed at the current stage of writing the file.
    InvalidState { op: &'static str, state: State },
    /// Grid or piece geometry does not fit the kind of grid being written.
    GeometryMismatch { kind: GridKind },
    /// A payload was appended for a different array than the next one declared.
    OutOfOrder { expected: Option<String>, found: String },
    /// The handle was issued by a different writer.
    ForeignHandle(String),
    /// The number of handles differs from the number of payloads given for them.
    HandleCountMismatch { handles: usize, payloads: usize },
    /// A payload does not match the type or length declared in its header.
    PayloadMismatch {
        name: String,
        declared: ArrayDescriptor,
        found: ArrayDescriptor,
    },
    /// Arrays declared in the header were never appended.
    MissingAppends(Vec<String>),
    /// The file was already saved.
    AlreadySaved,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IO(source) => write!(f, "IO error: {:?}", source),
            Error::XML(source) => write!(f, "XML error: {}", source),
            Error::Model(source) => write!(f, "Invalid data: {}", source),
            Error::InvalidState { op, state } => {
                write!(f, "Cannot {} while the writer is in state {:?}", op, state)
            }
            Error::GeometryMismatch { kind } => {
                write!(f, "Geometry does not describe a grid of type {}", kind)
            }
            Error::OutOfOrder {
                expected: Some(expected),
                found,
            } => write!(
                f,
                "Appended data for {:?} out of order: expected {:?}",
                found, expected
            ),
            Error::OutOfOrder {
                expected: None,
                found,
            } => write!(f, "Appended data for {:?} was never declared", found),
            Error::ForeignHandle(name) => {
                write!(f, "Array {:?} was declared by a different file", name)
            }
            Error::HandleCountMismatch { handles, payloads } => write!(
                f,
                "Got {} payloads for {} declared arrays",
                payloads, handles
            ),
            Error::PayloadMismatch {
                name,
                declared,
                found,
            } => write!(
                f,
                "Payload for {:?} has {} {} values but {} {} values were declared",
                name, found.num_values, found.scalar_type, declared.num_values, declared.scalar_type
            ),
            Error::MissingAppends(names) => {
                write!(f, "Declared arrays were never appended: {:?}", names)
            }
            Error::AlreadySaved => write!(f, "File was already saved"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(source) => Some(source),
            Error::XML(source) => Some(source),
            Error::Model(source) => Some(source),
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

impl From<model::Error> for Error {
    fn from(e: model::Error) -> Error {
        Error::Model(e)
    }
}

/// Stage of writing a file. Stages only ever advance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Created,
    GridOpen,
    PieceOpen,
    PieceClosed,
    GridClosed,
    Appending,
    Saved,
}

/// Encoding of the appended data section.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Length prefix and payload are stored as raw bytes.
    #[default]
    Raw,
    /// Length prefix and payload are base64 encoded separately.
    Base64,
}

impl Encoding {
    /// Number of bytes a block carrying `num_bytes` of payload occupies in the appended section.
    pub fn block_len(self, num_bytes: usize) -> Option<usize> {
        match self {
            Encoding::Raw => num_bytes.checked_add(HEADER_SIZE),
            Encoding::Base64 => base64::encoded_len(HEADER_SIZE, true)?
                .checked_add(base64::encoded_len(num_bytes, true)?),
        }
    }

    /// Encode a single block: the `UInt32` byte count of the payload followed by the payload.
    fn encode_block(self, payload: &Payload, num_bytes: usize) -> Result<Vec<u8>, Error> {
        let size = u32::try_from(num_bytes).map_err(|_| model::Error::PayloadTooLarge(num_bytes))?;
        let mut header = Vec::with_capacity(HEADER_SIZE);
        header.write_u32::<LE>(size)?;
        let mut data = Vec::with_capacity(num_bytes);
        payload.write_le(&mut data)?;
        Ok(match self {
            Encoding::Raw => {
                header.extend_from_slice(&data);
                header
            }
            Encoding::Base64 => {
                let mut block = STANDARD.encode(&header);
                block.push_str(&STANDARD.encode(&data));
                block.into_bytes()
            }
        })
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Encoding::Raw => write!(f, "raw"),
            Encoding::Base64 => write!(f, "base64"),
        }
    }
}

/// Configuration of a [`VtkFile`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct Options {
    pub encoding: Encoding,
}

/// Geometry attributes of the grid element.
#[derive(Clone, Debug, PartialEq)]
pub struct GridGeometry {
    kind: GridKind,
    whole_extent: Option<Extent>,
    origin: [f64; 3],
    spacing: [f64; 3],
    time_steps: Option<usize>,
}

impl GridGeometry {
    pub fn image(extent: impl Into<Extent>, origin: [f64; 3], spacing: [f64; 3]) -> Self {
        GridGeometry {
            kind: GridKind::ImageData,
            whole_extent: Some(extent.into()),
            origin,
            spacing,
            time_steps: None,
        }
    }

    pub fn rectilinear(extent: impl Into<Extent>) -> Self {
        GridGeometry {
            kind: GridKind::RectilinearGrid,
            whole_extent: Some(extent.into()),
            ..GridGeometry::unstructured()
        }
    }

    pub fn structured(extent: impl Into<Extent>) -> Self {
        GridGeometry {
            kind: GridKind::StructuredGrid,
            whole_extent: Some(extent.into()),
            ..GridGeometry::unstructured()
        }
    }

    pub fn unstructured() -> Self {
        GridGeometry {
            kind: GridKind::UnstructuredGrid,
            whole_extent: None,
            origin: [0.0; 3],
            spacing: [1.0; 3],
            time_steps: None,
        }
    }

    /// Mark the file as a time series with `n` steps, written as `TimeValues="0 1 ... n-1"`.
    pub fn with_time_steps(mut self, n: usize) -> Self {
        self.time_steps = Some(n);
        self
    }

    pub fn kind(&self) -> GridKind {
        self.kind
    }
}

/// Size attributes of a `Piece`.
#[derive(Clone, Debug, PartialEq)]
pub enum PieceGeometry {
    /// Extent of a piece of a structured grid.
    Extent(Extent),
    /// Point and cell counts of a piece of an unstructured grid.
    Counts { num_points: usize, num_cells: usize },
}

impl PieceGeometry {
    pub fn counts(num_points: usize, num_cells: usize) -> Self {
        PieceGeometry::Counts {
            num_points,
            num_cells,
        }
    }
}

impl From<Extent> for PieceGeometry {
    fn from(extent: Extent) -> Self {
        PieceGeometry::Extent(extent)
    }
}

/// Structural children of a `Piece`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Section {
    Points,
    Cells,
    PointData,
    CellData,
    Coordinates,
}

impl Section {
    pub fn tag(self) -> &'static str {
        match self {
            Section::Points => "Points",
            Section::Cells => "Cells",
            Section::PointData => "PointData",
            Section::CellData => "CellData",
            Section::Coordinates => "Coordinates",
        }
    }
}

/// Where field data is attached.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Point,
    Cell,
}

impl Location {
    pub fn section(self) -> Section {
        match self {
            Location::Point => Section::PointData,
            Location::Cell => Section::CellData,
        }
    }
}

/// Receipt for a declared data array, redeemed by appending its payload.
///
/// Handles cannot be copied, so each declared array is appended at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct ArrayHandle {
    writer: u64,
    index: usize,
    name: String,
    descriptor: ArrayDescriptor,
    offset: u64,
}

impl ArrayHandle {
    /// Position of the array in declaration order.
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn descriptor(&self) -> ArrayDescriptor {
        self.descriptor
    }
    /// Offset written to the header of the array.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// One declared array as recorded in the appended data ledger.
#[derive(Debug)]
struct LedgerEntry {
    name: String,
    descriptor: ArrayDescriptor,
    block_len: usize,
}

/// Bookkeeping of appended blocks: what was declared, and how much of it was written.
#[derive(Debug)]
struct Ledger {
    /// Id of the owning writer, shared with every handle it issues.
    writer: u64,
    entries: Vec<LedgerEntry>,
    /// Total encoded size of all declared blocks, i.e. the offset of the next declaration.
    declared_len: u64,
    /// Number of entries appended so far.
    appended: usize,
    /// Total encoded size of all appended blocks.
    appended_len: u64,
}

impl Ledger {
    fn new() -> Self {
        Ledger {
            writer: NEXT_WRITER_ID.fetch_add(1, Ordering::Relaxed),
            entries: Vec::new(),
            declared_len: 0,
            appended: 0,
            appended_len: 0,
        }
    }

    fn declare(&mut self, name: &str, descriptor: ArrayDescriptor, block_len: usize) -> (usize, u64) {
        let index = self.entries.len();
        let offset = self.declared_len;
        self.entries.push(LedgerEntry {
            name: name.to_string(),
            descriptor,
            block_len,
        });
        self.declared_len += block_len as u64;
        (index, offset)
    }

    fn next(&self) -> Option<&LedgerEntry> {
        self.entries.get(self.appended)
    }

    fn pending(&self) -> Vec<String> {
        self.entries[self.appended..]
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }
}

/// A single serial XML VTK file being written.
#[derive(Debug)]
pub struct VtkFile<W: Write> {
    xml: XmlWriter<W>,
    kind: GridKind,
    options: Options,
    state: State,
    ledger: Ledger,
    file_path: Option<PathBuf>,
}

impl VtkFile<BufWriter<File>> {
    /// Create the file `path` with the extension of the given grid kind appended.
    ///
    /// For example `VtkFile::create("out/mesh", GridKind::UnstructuredGrid)` writes
    /// `out/mesh.vtu`.
    pub fn create(path: impl AsRef<Path>, kind: GridKind) -> Result<Self, Error> {
        VtkFile::create_with_options(path, kind, Options::default())
    }

    pub fn create_with_options(
        path: impl AsRef<Path>,
        kind: GridKind,
        options: Options,
    ) -> Result<Self, Error> {
        let mut file_path = path.as_ref().as_os_str().to_owned();
        file_path.push(kind.extension());
        let file_path = PathBuf::from(file_path);
        debug!("Creating {} file {:?}", kind, file_path);
        let file = File::create(&file_path)?;
        let mut vtk = VtkFile::with_options(BufWriter::new(file), kind, options)?;
        vtk.file_path = Some(file_path);
        Ok(vtk)
    }

    /// Finish the document and close the file, returning its path.
    pub fn save(&mut self) -> Result<PathBuf, Error> {
        let stream = self.finish()?;
        stream.into_inner().map_err(|e| Error::IO(e.into_error()))?;
        let path = self.file_path.clone().unwrap_or_default();
        debug!("Saved {:?}", path);
        Ok(path)
    }
}

impl<W: Write> VtkFile<W> {
    /// Start a VTK document of the given kind on an arbitrary byte stream.
    pub fn new(stream: W, kind: GridKind) -> Result<Self, Error> {
        VtkFile::with_options(stream, kind, Options::default())
    }

    pub fn with_options(stream: W, kind: GridKind, options: Options) -> Result<Self, Error> {
        let mut xml = XmlWriter::with_declaration(stream)?;
        xml.open_element("VTKFile")?
            .add_attribute("type", kind)?
            .add_attribute("version", FILE_VERSION)?
            .add_attribute("byte_order", "LittleEndian")?
            .add_attribute("header_type", "UInt32")?;
        Ok(VtkFile {
            xml,
            kind,
            options,
            state: State::Created,
            ledger: Ledger::new(),
            file_path: None,
        })
    }

    pub fn kind(&self) -> GridKind {
        self.kind
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Path of the file being written, if the writer was created from a path.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    fn expect_state(&self, op: &'static str, allowed: &[State]) -> Result<(), Error> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    /// Add one comment per string ahead of the grid element.
    pub fn add_comments<I, S>(&mut self, comments: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.expect_state("add comments", &[State::Created])?;
        for comment in comments {
            self.xml.add_comment(comment.as_ref())?;
        }
        Ok(self)
    }

    /// Open the grid element with its geometry attributes.
    pub fn open_grid(&mut self, geometry: &GridGeometry) -> Result<&mut Self, Error> {
        self.expect_state("open grid", &[State::Created])?;
        if geometry.kind != self.kind {
            return Err(Error::GeometryMismatch { kind: self.kind });
        }
        self.xml.open_element(&self.kind.to_string())?;
        if let Some(extent) = &geometry.whole_extent {
            self.xml.add_attribute("WholeExtent", extent)?;
        }
        if self.kind == GridKind::ImageData {
            self.xml
                .add_attribute("Origin", Spaced(&geometry.origin[..]))?
                .add_attribute("Spacing", Spaced(&geometry.spacing[..]))?;
        }
        if let Some(n) = geometry.time_steps {
            let steps: Vec<usize> = (0..n).collect();
            self.xml.add_attribute("TimeValues", Spaced(steps.as_slice()))?;
        }
        self.state = State::GridOpen;
        Ok(self)
    }

    /// Open the single `Piece` of the grid.
    pub fn open_piece(&mut self, geometry: &PieceGeometry) -> Result<&mut Self, Error> {
        self.expect_state("open piece", &[State::GridOpen])?;
        match (geometry, self.kind.is_structured()) {
            (PieceGeometry::Extent(extent), true) => {
                self.xml
                    .open_element("Piece")?
                    .add_attribute("Extent", extent)?;
            }
            (
                PieceGeometry::Counts {
                    num_points,
                    num_cells,
                },
                false,
            ) => {
                self.xml
                    .open_element("Piece")?
                    .add_attribute("NumberOfPoints", num_points)?
                    .add_attribute("NumberOfCells", num_cells)?;
            }
            _ => return Err(Error::GeometryMismatch { kind: self.kind }),
        }
        self.state = State::PieceOpen;
        Ok(self)
    }

    /// Open a structural child of the piece.
    pub fn open_element(&mut self, section: Section) -> Result<&mut Self, Error> {
        self.expect_state("open element", &[State::PieceOpen])?;
        if self.xml.current() != Some("Piece") {
            return Err(Error::InvalidState {
                op: "open element outside of a piece",
                state: self.state,
            });
        }
        self.xml.open_element(section.tag())?;
        Ok(self)
    }

    pub fn close_element(&mut self, section: Section) -> Result<&mut Self, Error> {
        self.expect_state("close element", &[State::PieceOpen])?;
        self.xml.close_element(Some(section.tag()))?;
        Ok(self)
    }

    /// Open `PointData` or `CellData`, naming the default array of each field kind.
    pub fn open_data(
        &mut self,
        location: Location,
        defaults: &[(FieldKind, &str)],
    ) -> Result<&mut Self, Error> {
        for (_, name) in defaults {
            xml::check_value(name)?;
        }
        self.open_element(location.section())?;
        self.xml.add_attributes(
            defaults
                .iter()
                .map(|(kind, name)| (kind.attribute_name(), name)),
        )?;
        Ok(self)
    }

    pub fn close_data(&mut self, location: Location) -> Result<&mut Self, Error> {
        self.close_element(location.section())
    }

    /// Declare the header of a data array stored in the appended section.
    ///
    /// The `offset` attribute is the total size of all arrays declared before this one. The
    /// returned handle must later be passed to [`append`](VtkFile::append) along with a payload
    /// matching `descriptor`.
    pub fn add_array(
        &mut self,
        name: &str,
        descriptor: ArrayDescriptor,
        num_comp: u32,
        time_step: Option<usize>,
    ) -> Result<ArrayHandle, Error> {
        self.expect_state("declare data array", &[State::PieceOpen])?;
        if self.xml.depth() <= PIECE_DEPTH {
            return Err(Error::InvalidState {
                op: "declare data array outside of a piece element",
                state: self.state,
            });
        }
        xml::check_value(name)?;
        if num_comp == 0 || descriptor.num_values % num_comp as usize != 0 {
            return Err(model::Error::InvalidComponentCount {
                num_comp,
                len: descriptor.num_values,
            }
            .into());
        }
        let num_bytes = descriptor.num_bytes();
        if u32::try_from(num_bytes).is_err() {
            return Err(model::Error::PayloadTooLarge(num_bytes).into());
        }
        let block_len = self
            .options
            .encoding
            .block_len(num_bytes)
            .ok_or(model::Error::PayloadTooLarge(num_bytes))?;

        let offset = self.ledger.declared_len;
        self.xml
            .open_element("DataArray")?
            .add_attribute("type", descriptor.scalar_type)?
            .add_attribute("Name", name)?
            .add_attribute("NumberOfComponents", num_comp)?
            .add_attribute("format", "appended")?
            .add_attribute("offset", offset)?;
        if let Some(step) = time_step {
            self.xml.add_attribute("TimeStep", step)?;
        }
        self.xml.close_element(None)?;

        let (index, offset) = self.ledger.declare(name, descriptor, block_len);
        trace!(
            "Declared {:?} ({} x {}) at offset {} with {} bytes",
            name,
            descriptor.num_values,
            descriptor.scalar_type,
            offset,
            block_len
        );
        Ok(ArrayHandle {
            writer: self.ledger.writer,
            index,
            name: name.to_string(),
            descriptor,
            offset,
        })
    }

    /// Declare an array shaped like `payload`: three components for coordinate bundles, one
    /// otherwise.
    pub fn add_data(&mut self, name: &str, payload: &Payload) -> Result<ArrayHandle, Error> {
        let descriptor = payload.descriptor()?;
        self.add_array(name, descriptor, payload.num_comp(), None)
    }

    /// Declare a data section holding the given fields.
    ///
    /// With `time_steps`, each field gets one header per step, field by field. Nothing is
    /// written when `fields` is empty.
    pub fn declare_fields(
        &mut self,
        location: Location,
        fields: &[Field],
        time_steps: Option<usize>,
    ) -> Result<Vec<ArrayHandle>, Error> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        for field in fields {
            xml::check_value(&field.name)?;
            field.data.descriptor()?;
        }
        self.open_data(location, &model::default_fields(fields))?;
        let mut handles = Vec::new();
        for field in fields {
            let descriptor = field.data.descriptor()?;
            let num_comp = field.kind.num_comp();
            match time_steps {
                Some(n) => {
                    for step in 0..n {
                        handles.push(self.add_array(&field.name, descriptor, num_comp, Some(step))?);
                    }
                }
                None => handles.push(self.add_array(&field.name, descriptor, num_comp, None)?),
            }
        }
        self.close_data(location)?;
        Ok(handles)
    }

    pub fn close_piece(&mut self) -> Result<&mut Self, Error> {
        self.expect_state("close piece", &[State::PieceOpen])?;
        self.xml.close_element(Some("Piece"))?;
        self.state = State::PieceClosed;
        Ok(self)
    }

    pub fn close_grid(&mut self) -> Result<&mut Self, Error> {
        self.expect_state("close grid", &[State::PieceClosed])?;
        self.xml.close_element(Some(&self.kind.to_string()))?;
        self.state = State::GridClosed;
        Ok(self)
    }

    /// Append the payload of a declared array.
    ///
    /// Payloads must be appended in the order their arrays were declared, and each must match
    /// the type and length given in its declaration.
    pub fn append(&mut self, handle: ArrayHandle, payload: &Payload) -> Result<&mut Self, Error> {
        self.expect_state("append data", &[State::GridClosed, State::Appending])?;
        if handle.writer != self.ledger.writer {
            return Err(Error::ForeignHandle(handle.name));
        }
        let (declared, block_len) = match self.ledger.next() {
            Some(entry) if self.ledger.appended == handle.index => (entry.descriptor, entry.block_len),
            expected => {
                return Err(Error::OutOfOrder {
                    expected: expected.map(|e| e.name.clone()),
                    found: handle.name,
                })
            }
        };
        let found = payload.descriptor()?;
        let block = self.options.encoding.encode_block(payload, found.num_bytes())?;
        if found != declared || block.len() != block_len {
            return Err(Error::PayloadMismatch {
                name: handle.name,
                declared,
                found,
            });
        }

        if self.state == State::GridClosed {
            debug!("Writing appended data ({} encoding)", self.options.encoding);
            self.xml
                .open_element("AppendedData")?
                .add_attribute("encoding", self.options.encoding)?
                .add_text("_")?;
            self.state = State::Appending;
        }
        self.xml.add_bytes(&block)?;
        self.ledger.appended += 1;
        self.ledger.appended_len += block.len() as u64;
        trace!(
            "Appended {:?}: {} bytes, {} total",
            handle.name,
            block.len(),
            self.ledger.appended_len
        );
        Ok(self)
    }

    /// Append the payloads of `fields` using handles from [`declare_fields`](VtkFile::declare_fields)
    /// without time steps.
    ///
    /// There must be exactly one handle per field.
    pub fn append_fields(
        &mut self,
        handles: Vec<ArrayHandle>,
        fields: &[Field],
    ) -> Result<&mut Self, Error> {
        if handles.len() != fields.len() {
            return Err(Error::HandleCountMismatch {
                handles: handles.len(),
                payloads: fields.len(),
            });
        }
        for (handle, field) in handles.into_iter().zip(fields) {
            self.append(handle, &field.data)?;
        }
        Ok(self)
    }

    /// Close all remaining elements and return the underlying stream.
    ///
    /// Every declared array must have been appended.
    pub fn finish(&mut self) -> Result<W, Error> {
        if self.state == State::Saved {
            return Err(Error::AlreadySaved);
        }
        self.expect_state("save", &[State::Created, State::GridClosed, State::Appending])?;
        let pending = self.ledger.pending();
        if !pending.is_empty() {
            return Err(Error::MissingAppends(pending));
        }
        if self.state == State::Appending {
            self.xml.close_element(Some("AppendedData"))?;
        }
        self.xml.close_element(Some("VTKFile"))?;
        let stream = self.xml.close()?;
        self.state = State::Saved;
        Ok(stream)
    }
}
