use std::fmt;
use std::io::Write;
use std::ops::RangeInclusive;
use std::str::FromStr;

use byteorder::{WriteBytesExt, LE};

/**
 * VTK Data Model
 */

/// Error type describing invalid data handed to the writer.
#[derive(Debug)]
pub enum Error {
    /// A field kind tag that is not one of `scalars`, `vectors`, `normals`, `tensors` or `tcoords`.
    UnknownFieldKind(String),
    /// Component count is zero, out of range for the field kind, or does not divide the data.
    InvalidComponentCount { num_comp: u32, len: usize },
    /// The three coordinate arrays of a point bundle differ in type or length.
    MismatchedComponents,
    /// A single block exceeds what a `UInt32` header can describe.
    PayloadTooLarge(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownFieldKind(tag) => write!(f, "Unknown field kind: {:?}", tag),
            Error::InvalidComponentCount { num_comp, len } => write!(
                f,
                "Invalid number of components {} for an array of {} values",
                num_comp, len
            ),
            Error::MismatchedComponents => {
                write!(f, "Coordinate arrays must have the same type and length")
            }
            Error::PayloadTooLarge(size) => {
                write!(f, "Payload of {} bytes does not fit a UInt32 header", size)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Numeric element types supported in XML data arrays.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ScalarType {
    /// Data is interpreted as `u8` (unsigned 8 bit) integers.
    U8,
    /// Data is interpreted as `i8` (signed 8 bit) integers.
    I8,
    /// Data is interpreted as `u16` (unsigned 16 bit) integers.
    U16,
    /// Data is interpreted as `i16` (signed 16 bit) integers.
    I16,
    /// Data is interpreted as `u32` (unsigned 32 bit) integers.
    U32,
    /// Data is interpreted as `i32` (signed 32 bit) integers.
    I32,
    /// Data is interpreted as `u64` (unsigned 64 bit) integers.
    U64,
    /// Data is interpreted as `i64` (signed 64 bit) integers.
    I64,
    /// Data is interpreted as `f32` (single precision) floats.
    F32,
    /// Data is interpreted as `f64` (double precision) floats.
    F64,
}

impl ScalarType {
    /// Size of a single element in bytes.
    pub fn size(self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::I8 => 1,
            ScalarType::U16 | ScalarType::I16 => 2,
            ScalarType::U32 | ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::U64 | ScalarType::I64 | ScalarType::F64 => 8,
        }
    }
}

/// Formats the type the way the `type` attribute of a `DataArray` expects it.
impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ScalarType::U8 => write!(f, "UInt8"),
            ScalarType::I8 => write!(f, "Int8"),
            ScalarType::U16 => write!(f, "UInt16"),
            ScalarType::I16 => write!(f, "Int16"),
            ScalarType::U32 => write!(f, "UInt32"),
            ScalarType::I32 => write!(f, "Int32"),
            ScalarType::U64 => write!(f, "UInt64"),
            ScalarType::I64 => write!(f, "Int64"),
            ScalarType::F32 => write!(f, "Float32"),
            ScalarType::F64 => write!(f, "Float64"),
        }
    }
}

/// Contiguous numeric data of a type determined at run time.
#[derive(Clone, PartialEq, Debug)]
pub enum IOBuffer {
    /// Vector of unsigned bytes.
    U8(Vec<u8>),
    /// Vector of signed bytes.
    I8(Vec<i8>),
    /// Vector of unsigned short integers `u16`.
    U16(Vec<u16>),
    /// Vector of signed short integers `i16`.
    I16(Vec<i16>),
    /// Vector of unsigned integers `u32`.
    U32(Vec<u32>),
    /// Vector of signed integers `i32`.
    I32(Vec<i32>),
    /// Vector of unsigned long integers `u64`.
    U64(Vec<u64>),
    /// Vector of signed long integers `i64`.
    I64(Vec<i64>),
    /// Vector of single precision floats.
    F32(Vec<f32>),
    /// Vector of double precision floats.
    F64(Vec<f64>),
}

macro_rules! impl_io_buffer_convert {
    ($t:ident <=> $v:ident) => {
        impl From<Vec<$t>> for IOBuffer {
            fn from(v: Vec<$t>) -> IOBuffer {
                IOBuffer::$v(v)
            }
        }

        impl std::iter::FromIterator<$t> for IOBuffer {
            fn from_iter<T>(iter: T) -> Self
            where
                T: IntoIterator<Item = $t>,
            {
                iter.into_iter().collect::<Vec<$t>>().into()
            }
        }
    };
}

impl_io_buffer_convert!(u8 <=> U8);
impl_io_buffer_convert!(i8 <=> I8);
impl_io_buffer_convert!(u16 <=> U16);
impl_io_buffer_convert!(i16 <=> I16);
impl_io_buffer_convert!(u32 <=> U32);
impl_io_buffer_convert!(i32 <=> I32);
impl_io_buffer_convert!(u64 <=> U64);
impl_io_buffer_convert!(i64 <=> I64);
impl_io_buffer_convert!(f32 <=> F32);
impl_io_buffer_convert!(f64 <=> F64);

/// Evaluate the expression `$e` given a `Vec` `$v`.
macro_rules! match_buf {
    ($buf:expr; $v:pat => $e:expr) => {
        match $buf {
            IOBuffer::U8($v) => $e,
            IOBuffer::I8($v) => $e,
            IOBuffer::U16($v) => $e,
            IOBuffer::I16($v) => $e,
            IOBuffer::U32($v) => $e,
            IOBuffer::I32($v) => $e,
            IOBuffer::U64($v) => $e,
            IOBuffer::I64($v) => $e,
            IOBuffer::F32($v) => $e,
            IOBuffer::F64($v) => $e,
        }
    };
}

impl IOBuffer {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            IOBuffer::U8(_) => ScalarType::U8,
            IOBuffer::I8(_) => ScalarType::I8,
            IOBuffer::U16(_) => ScalarType::U16,
            IOBuffer::I16(_) => ScalarType::I16,
            IOBuffer::U32(_) => ScalarType::U32,
            IOBuffer::I32(_) => ScalarType::I32,
            IOBuffer::U64(_) => ScalarType::U64,
            IOBuffer::I64(_) => ScalarType::I64,
            IOBuffer::F32(_) => ScalarType::F32,
            IOBuffer::F64(_) => ScalarType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match_buf!(self; v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of bytes occupied by the buffer contents.
    pub fn num_bytes(&self) -> usize {
        self.len() * self.scalar_type().size()
    }

    /// Write element `i` to `out` in little-endian byte order.
    fn write_elem_le(&self, i: usize, out: &mut impl Write) -> std::io::Result<()> {
        match self {
            IOBuffer::U8(v) => out.write_u8(v[i]),
            IOBuffer::I8(v) => out.write_i8(v[i]),
            IOBuffer::U16(v) => out.write_u16::<LE>(v[i]),
            IOBuffer::I16(v) => out.write_i16::<LE>(v[i]),
            IOBuffer::U32(v) => out.write_u32::<LE>(v[i]),
            IOBuffer::I32(v) => out.write_i32::<LE>(v[i]),
            IOBuffer::U64(v) => out.write_u64::<LE>(v[i]),
            IOBuffer::I64(v) => out.write_i64::<LE>(v[i]),
            IOBuffer::F32(v) => out.write_f32::<LE>(v[i]),
            IOBuffer::F64(v) => out.write_f64::<LE>(v[i]),
        }
    }

    /// Write the whole buffer to `out` in little-endian byte order.
    pub fn write_le(&self, out: &mut impl Write) -> std::io::Result<()> {
        match self {
            IOBuffer::U8(v) => out.write_all(v),
            IOBuffer::I8(v) => out.write_all(bytemuck::cast_slice(v.as_slice())),
            _ => (0..self.len()).try_for_each(|i| self.write_elem_le(i, out)),
        }
    }
}

/// Displays a sequence of values separated by single spaces, the convention used by VTK for
/// multi-valued attributes such as `WholeExtent` or `TimeValues`.
#[derive(Copy, Clone, Debug)]
pub struct Spaced<'a, T>(pub &'a [T]);

impl<T: fmt::Display> fmt::Display for Spaced<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut iter = self.0.iter();
        if let Some(first) = iter.next() {
            write!(f, "{}", first)?;
            for x in iter {
                write!(f, " {}", x)?;
            }
        }
        Ok(())
    }
}

/// Type and total number of scalar values of a data array.
///
/// This is everything needed to predict the size of the binary block an array will occupy in
/// the appended data section.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ArrayDescriptor {
    pub scalar_type: ScalarType,
    /// Total number of scalar values (all components of all tuples).
    pub num_values: usize,
}

impl ArrayDescriptor {
    pub fn new(scalar_type: ScalarType, num_values: usize) -> Self {
        ArrayDescriptor {
            scalar_type,
            num_values,
        }
    }

    /// Size of the raw payload in bytes, excluding the length prefix.
    pub fn num_bytes(&self) -> usize {
        self.num_values * self.scalar_type.size()
    }
}

/// Binary data to be stored in the appended data section.
#[derive(Clone, PartialEq, Debug)]
pub enum Payload {
    /// A single homogeneous sequence, written as is.
    Flat(IOBuffer),
    /// Three equal length coordinate sequences, written interleaved as `x0 y0 z0 x1 y1 z1 ...`.
    Xyz(IOBuffer, IOBuffer, IOBuffer),
}

impl Payload {
    /// Bundle separate `x`, `y` and `z` coordinates into a single three component payload.
    pub fn xyz(
        x: impl Into<IOBuffer>,
        y: impl Into<IOBuffer>,
        z: impl Into<IOBuffer>,
    ) -> Result<Self, Error> {
        let payload = Payload::Xyz(x.into(), y.into(), z.into());
        payload.descriptor()?;
        Ok(payload)
    }

    /// Number of components implied by the payload shape.
    pub fn num_comp(&self) -> u32 {
        match self {
            Payload::Flat(_) => 1,
            Payload::Xyz(..) => 3,
        }
    }

    /// Describe the payload, checking that bundled coordinates agree in type and length.
    pub fn descriptor(&self) -> Result<ArrayDescriptor, Error> {
        let desc = match self {
            Payload::Flat(buf) => ArrayDescriptor::new(buf.scalar_type(), buf.len()),
            Payload::Xyz(x, y, z) => {
                let scalar_type = x.scalar_type();
                if y.scalar_type() != scalar_type
                    || z.scalar_type() != scalar_type
                    || y.len() != x.len()
                    || z.len() != x.len()
                {
                    return Err(Error::MismatchedComponents);
                }
                ArrayDescriptor::new(scalar_type, 3 * x.len())
            }
        };
        if u32::try_from(desc.num_bytes()).is_err() {
            return Err(Error::PayloadTooLarge(desc.num_bytes()));
        }
        Ok(desc)
    }

    /// Write the payload bytes (without length prefix) in little-endian order.
    pub fn write_le(&self, out: &mut impl Write) -> std::io::Result<()> {
        match self {
            Payload::Flat(buf) => buf.write_le(out),
            Payload::Xyz(x, y, z) => {
                for i in 0..x.len() {
                    x.write_elem_le(i, out)?;
                    y.write_elem_le(i, out)?;
                    z.write_elem_le(i, out)?;
                }
                Ok(())
            }
        }
    }
}

impl From<IOBuffer> for Payload {
    fn from(buf: IOBuffer) -> Payload {
        Payload::Flat(buf)
    }
}

impl<T> From<Vec<T>> for Payload
where
    Vec<T>: Into<IOBuffer>,
{
    fn from(v: Vec<T>) -> Payload {
        Payload::Flat(v.into())
    }
}

/// The kind of a point or cell field, which fixes its number of components.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FieldKind {
    Scalars,
    Vectors,
    Normals,
    Tensors,
    /// Texture coordinates with the given dimension (1, 2 or 3).
    TCoords(u32),
}

impl FieldKind {
    pub fn num_comp(self) -> u32 {
        match self {
            FieldKind::Scalars => 1,
            FieldKind::Vectors | FieldKind::Normals => 3,
            FieldKind::Tensors => 9,
            FieldKind::TCoords(dim) => dim,
        }
    }

    /// Attribute name used on `PointData`/`CellData` to mark the default array of this kind.
    pub fn attribute_name(self) -> &'static str {
        match self {
            FieldKind::Scalars => "scalars",
            FieldKind::Vectors => "vectors",
            FieldKind::Normals => "normals",
            FieldKind::Tensors => "tensors",
            FieldKind::TCoords(_) => "tcoords",
        }
    }

    /// Texture coordinates with the given dimension.
    pub fn tcoords(dim: u32) -> Result<Self, Error> {
        if (1..=3).contains(&dim) {
            Ok(FieldKind::TCoords(dim))
        } else {
            Err(Error::InvalidComponentCount {
                num_comp: dim,
                len: 0,
            })
        }
    }

    fn same_kind(self, other: FieldKind) -> bool {
        self.attribute_name() == other.attribute_name()
    }
}

/// Parses the kind tags `scalars`, `vectors`, `normals` and `tensors`.
///
/// Texture coordinates need an explicit dimension, so `tcoords` must be built with
/// [`FieldKind::tcoords`] and is rejected here like any unknown tag.
impl FromStr for FieldKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "scalars" => Ok(FieldKind::Scalars),
            "vectors" => Ok(FieldKind::Vectors),
            "normals" => Ok(FieldKind::Normals),
            "tensors" => Ok(FieldKind::Tensors),
            _ => Err(Error::UnknownFieldKind(s.to_string())),
        }
    }
}

/// A named point or cell field together with its data.
#[derive(Clone, PartialEq, Debug)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub data: Payload,
}

impl Field {
    /// Construct a field, checking that the data splits evenly into tuples of the kind's size.
    pub fn new(name: impl Into<String>, kind: FieldKind, data: impl Into<Payload>) -> Result<Self, Error> {
        let data = data.into();
        let desc = data.descriptor()?;
        let num_comp = kind.num_comp();
        if let FieldKind::TCoords(dim) = kind {
            FieldKind::tcoords(dim)?;
        }
        if num_comp == 0 || desc.num_values % num_comp as usize != 0 {
            return Err(Error::InvalidComponentCount {
                num_comp,
                len: desc.num_values,
            });
        }
        Ok(Field {
            name: name.into(),
            kind,
            data,
        })
    }

    pub fn scalars(name: impl Into<String>, data: impl Into<Payload>) -> Result<Self, Error> {
        Field::new(name, FieldKind::Scalars, data)
    }

    pub fn vectors(name: impl Into<String>, data: impl Into<Payload>) -> Result<Self, Error> {
        Field::new(name, FieldKind::Vectors, data)
    }
}

/// Pick the default array name for each field kind: the first field of that kind.
pub fn default_fields(fields: &[Field]) -> Vec<(FieldKind, &str)> {
    let mut defaults: Vec<(FieldKind, &str)> = Vec::new();
    for field in fields {
        if !defaults.iter().any(|(k, _)| k.same_kind(field.kind)) {
            defaults.push((field.kind, field.name.as_str()));
        }
    }
    defaults
}

/// This enum describes the types of Cells representable by vtk files.
///
/// For more details on each of these types see, the [VTK file
/// formats](https://www.vtk.org/wp-content/uploads/2015/04/file-formats.pdf) documentation or
/// `vtkCell.h` in the vtk SDK.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CellType {
    Vertex = 1,
    PolyVertex = 2,
    Line = 3,
    PolyLine = 4,
    Triangle = 5,
    TriangleStrip = 6,
    Polygon = 7,
    Pixel = 8,
    Quad = 9,
    Tetra = 10,
    Voxel = 11,
    Hexahedron = 12,
    Wedge = 13,
    Pyramid = 14,
    QuadraticEdge = 21,
    QuadraticTriangle = 22,
    QuadraticQuad = 23,
    QuadraticTetra = 24,
    QuadraticHexahedron = 25,
}

/// Collect cell types into the `UInt8` buffer stored as the `types` array of a `Cells` section.
pub fn cell_types_buffer(types: &[CellType]) -> IOBuffer {
    types.iter().map(|&t| t as u8).collect()
}

/// The kind of data set stored in a serial XML VTK file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GridKind {
    ImageData,
    RectilinearGrid,
    StructuredGrid,
    UnstructuredGrid,
}

impl GridKind {
    /// File extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            GridKind::ImageData => ".vti",
            GridKind::RectilinearGrid => ".vtr",
            GridKind::StructuredGrid => ".vts",
            GridKind::UnstructuredGrid => ".vtu",
        }
    }

    /// Whether pieces of this grid are described by an extent rather than explicit counts.
    pub fn is_structured(self) -> bool {
        !matches!(self, GridKind::UnstructuredGrid)
    }
}

impl fmt::Display for GridKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GridKind::ImageData => write!(f, "ImageData"),
            GridKind::RectilinearGrid => write!(f, "RectilinearGrid"),
            GridKind::StructuredGrid => write!(f, "StructuredGrid"),
            GridKind::UnstructuredGrid => write!(f, "UnstructuredGrid"),
        }
    }
}

/// Inclusive index ranges along the x, y and z axes.
pub type RangeExtent = [RangeInclusive<i32>; 3];

/// Extent of a structured grid or piece.
#[derive(Clone, Debug, PartialEq)]
pub enum Extent {
    /// Number of cells along each axis, starting at index zero.
    Dims([u32; 3]),
    /// Explicit index ranges.
    Ranges(RangeExtent),
}

impl From<[u32; 3]> for Extent {
    fn from(dims: [u32; 3]) -> Extent {
        Extent::Dims(dims)
    }
}

impl From<RangeExtent> for Extent {
    fn from(rng: RangeExtent) -> Extent {
        Extent::Ranges(rng)
    }
}

/// Formats as `x0 x1 y0 y1 z0 z1`. Dimensions `[nx, ny, nz]` become `0 nx 0 ny 0 nz`.
impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Extent::Dims([nx, ny, nz]) => write!(f, "0 {} 0 {} 0 {}", nx, ny, nz),
            Extent::Ranges([x, y, z]) => write!(
                f,
                "{} {} {} {} {} {}",
                x.start(),
                x.end(),
                y.start(),
                y.end(),
                z.start(),
                z.end()
            ),
        }
    }
}
