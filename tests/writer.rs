use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{ReadBytesExt, LE};
use pretty_assertions::assert_eq;
use quick_xml::events::Event;
use quick_xml::Reader;

use vtkwrite::model::*;
use vtkwrite::writer::{self, *};
use vtkwrite::{xml, Error};

type Result = std::result::Result<(), Error>;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An element of a parsed header, with its nesting depth.
#[derive(Debug)]
struct Element {
    tag: String,
    depth: usize,
    attributes: Vec<(String, String)>,
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a complete XML document, failing on mismatched tags.
fn parse_elements(xml: &str) -> Vec<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut elements = Vec::new();
    let mut depth = 0;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                elements.push(element(&e, depth));
                depth += 1;
            }
            Ok(Event::Empty(e)) => elements.push(element(&e, depth)),
            Ok(Event::End(_)) => depth -= 1,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => panic!("invalid XML at {}: {:?}", reader.buffer_position(), e),
        }
    }
    assert_eq!(depth, 0);
    elements
}

fn element(e: &quick_xml::events::BytesStart, depth: usize) -> Element {
    Element {
        tag: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        depth,
        attributes: e
            .attributes()
            .flatten()
            .map(|a| {
                (
                    String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                    String::from_utf8_lossy(&a.value).into_owned(),
                )
            })
            .collect(),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// The XML part of a file with raw appended data, closed off so it parses on its own.
fn header(bytes: &[u8]) -> String {
    let end = find(bytes, b"\n<AppendedData").unwrap_or(bytes.len());
    let mut text = String::from_utf8(bytes[..end].to_vec()).unwrap();
    if end < bytes.len() {
        text.push_str("\n</VTKFile>");
    }
    text
}

/// Raw appended bytes between the `_` marker and the closing tag.
fn appended(bytes: &[u8]) -> &[u8] {
    let marker = b"<AppendedData encoding=\"raw\">\n_";
    let start = find(bytes, marker).unwrap() + marker.len();
    let end = bytes.len() - b"\n</AppendedData>\n</VTKFile>\n".len();
    &bytes[start..end]
}

/// Payload of the block starting at `offset`.
fn block(data: &[u8], offset: usize) -> &[u8] {
    let len = Cursor::new(&data[offset..]).read_u32::<LE>().unwrap() as usize;
    &data[offset + 4..offset + 4 + len]
}

fn type_size(name: &str) -> usize {
    match name {
        "Int8" | "UInt8" => 1,
        "Int16" | "UInt16" => 2,
        "Int32" | "UInt32" | "Float32" => 4,
        _ => 8,
    }
}

fn decode_f64(bytes: &[u8]) -> Vec<f64> {
    let mut cursor = Cursor::new(bytes);
    (0..bytes.len() / 8)
        .map(|_| cursor.read_f64::<LE>().unwrap())
        .collect()
}

fn write_lines() -> std::result::Result<Vec<u8>, Error> {
    let points = Payload::xyz(
        vec![0.0f64, 1.0, 0.0, 1.0],
        vec![0.0f64, 0.0, 1.0, 1.0],
        vec![0.0f64; 4],
    )?;
    let connectivity = Payload::from(vec![0i32, 1, 2, 3]);
    let offsets = Payload::from(vec![2i32, 4]);
    let types = Payload::from(cell_types_buffer(&[CellType::Line, CellType::Line]));
    let fields = vec![Field::scalars("temp", vec![1.0f64, 2.0, 3.0, 4.0])?];

    let mut vtk = VtkFile::new(Vec::new(), GridKind::UnstructuredGrid)?;
    vtk.add_comments(["two disjoint lines"])?;
    vtk.open_grid(&GridGeometry::unstructured())?
        .open_piece(&PieceGeometry::counts(4, 2))?
        .open_element(Section::Points)?;
    let hp = vtk.add_data("points", &points)?;
    vtk.close_element(Section::Points)?
        .open_element(Section::Cells)?;
    let hc = vtk.add_data("connectivity", &connectivity)?;
    let ho = vtk.add_data("offsets", &offsets)?;
    let ht = vtk.add_data("types", &types)?;
    vtk.close_element(Section::Cells)?;
    let hf = vtk.declare_fields(Location::Point, &fields, None)?;
    vtk.close_piece()?.close_grid()?;

    vtk.append(hp, &points)?
        .append(hc, &connectivity)?
        .append(ho, &offsets)?
        .append(ht, &types)?
        .append_fields(hf, &fields)?;
    Ok(vtk.finish()?)
}

#[test]
fn two_lines_end_to_end() -> Result {
    init();
    let bytes = write_lines()?;
    let elements = parse_elements(&header(&bytes));

    let piece = elements.iter().find(|e| e.tag == "Piece").unwrap();
    assert_eq!(piece.attr("NumberOfPoints"), Some("4"));
    assert_eq!(piece.attr("NumberOfCells"), Some("2"));

    let point_data = elements.iter().find(|e| e.tag == "PointData").unwrap();
    assert_eq!(point_data.attr("scalars"), Some("temp"));

    let arrays: Vec<&Element> = elements.iter().filter(|e| e.tag == "DataArray").collect();
    let names: Vec<&str> = arrays.iter().map(|a| a.attr("Name").unwrap()).collect();
    assert_eq!(names, vec!["points", "connectivity", "offsets", "types", "temp"]);

    let data = appended(&bytes);
    let expected_values = [12, 4, 2, 2, 4];
    let mut end = 0;
    for (array, num_values) in arrays.iter().zip(expected_values.iter()) {
        assert_eq!(array.attr("format"), Some("appended"));
        let offset: usize = array.attr("offset").unwrap().parse().unwrap();
        assert_eq!(offset, end, "blocks are contiguous");
        let num_comp: usize = array.attr("NumberOfComponents").unwrap().parse().unwrap();
        let payload = block(data, offset);
        let size = type_size(array.attr("type").unwrap());
        assert_eq!(payload.len(), num_values * size);
        assert_eq!((payload.len() / size) % num_comp, 0);
        end = offset + 4 + payload.len();
    }
    assert_eq!(end, data.len(), "exactly five blocks");

    let temp = block(data, arrays[4].attr("offset").unwrap().parse().unwrap());
    assert_eq!(decode_f64(temp), vec![1.0, 2.0, 3.0, 4.0]);
    let types = block(data, arrays[3].attr("offset").unwrap().parse().unwrap());
    assert_eq!(types, &[3, 3]);
    Ok(())
}

#[test]
fn offsets_sum_preceding_blocks() -> Result {
    init();
    let payloads = vec![
        Payload::from(vec![1u8, 2, 3]),
        Payload::from(vec![1.0f32; 10]),
        Payload::from(Vec::<i64>::new()),
        Payload::from(vec![-1i16, 7]),
        Payload::from(vec![0.5f64; 3]),
    ];
    let mut vtk = VtkFile::new(Vec::new(), GridKind::UnstructuredGrid)?;
    vtk.open_grid(&GridGeometry::unstructured())?
        .open_piece(&PieceGeometry::counts(0, 0))?
        .open_element(Section::PointData)?;
    let mut handles = Vec::new();
    for (i, payload) in payloads.iter().enumerate() {
        handles.push(vtk.add_data(&format!("a{}", i), payload)?);
    }
    vtk.close_element(Section::PointData)?
        .close_piece()?
        .close_grid()?;
    for (handle, payload) in handles.into_iter().zip(&payloads) {
        vtk.append(handle, payload)?;
    }
    let bytes = vtk.finish()?;

    let offsets: Vec<usize> = parse_elements(&header(&bytes))
        .iter()
        .filter(|e| e.tag == "DataArray")
        .map(|e| e.attr("offset").unwrap().parse().unwrap())
        .collect();
    assert_eq!(offsets, vec![0, 7, 51, 55, 63]);

    let data = appended(&bytes);
    for (offset, payload) in offsets.iter().zip(&payloads) {
        assert_eq!(block(data, *offset).len(), payload.descriptor()?.num_bytes());
    }
    Ok(())
}

#[test]
fn points_are_interleaved() -> Result {
    init();
    let points = Payload::xyz(vec![0.0f64, 1.0], vec![0.0f64, 0.0], vec![0.0f64, 0.0])?;
    let mut vtk = VtkFile::new(Vec::new(), GridKind::UnstructuredGrid)?;
    vtk.open_grid(&GridGeometry::unstructured())?
        .open_piece(&PieceGeometry::counts(2, 0))?
        .open_element(Section::Points)?;
    let handle = vtk.add_data("points", &points)?;
    vtk.close_element(Section::Points)?
        .close_piece()?
        .close_grid()?
        .append(handle, &points)?;
    let bytes = vtk.finish()?;

    let header = header(&bytes);
    let elements = parse_elements(&header);
    let array = elements.iter().find(|e| e.tag == "DataArray").unwrap();
    assert_eq!(array.attr("type"), Some("Float64"));
    assert_eq!(array.attr("NumberOfComponents"), Some("3"));
    assert_eq!(
        decode_f64(block(appended(&bytes), 0)),
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]
    );
    Ok(())
}

#[test]
fn mismatched_close_leaves_document_intact() -> Result {
    init();
    let mut vtk = VtkFile::new(Vec::new(), GridKind::UnstructuredGrid)?;
    vtk.open_grid(&GridGeometry::unstructured())?
        .open_piece(&PieceGeometry::counts(0, 0))?
        .open_element(Section::Points)?;
    match vtk.close_element(Section::Cells) {
        Err(writer::Error::XML(xml::Error::UnmatchedClose { expected, found })) => {
            assert_eq!(expected.as_deref(), Some("Points"));
            assert_eq!(found, "Cells");
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert!(vtk.close_grid().is_err());
    assert!(vtk.close_piece().is_err());
    vtk.close_element(Section::Points)?
        .close_piece()?
        .close_grid()?;
    let bytes = vtk.finish()?;
    let tags: Vec<(String, usize)> = parse_elements(std::str::from_utf8(&bytes).unwrap())
        .into_iter()
        .map(|e| (e.tag, e.depth))
        .collect();
    assert_eq!(
        tags,
        vec![
            ("VTKFile".to_string(), 0),
            ("UnstructuredGrid".to_string(), 1),
            ("Piece".to_string(), 2),
            ("Points".to_string(), 3),
        ]
    );
    Ok(())
}

#[test]
fn base64_document_is_well_formed() -> Result {
    init();
    let options = Options {
        encoding: Encoding::Base64,
    };
    let x = Payload::from(vec![0.0f32, 1.0, 2.0]);
    let y = Payload::from(vec![0.0f32, 1.0]);
    let z = Payload::from(vec![0.0f32]);
    let fields = vec![
        Field::scalars("p", vec![1.0f32; 2])?,
        Field::vectors("v", vec![0.0f64; 6])?,
    ];

    let mut vtk = VtkFile::with_options(Vec::new(), GridKind::RectilinearGrid, options)?;
    vtk.open_grid(&GridGeometry::rectilinear([2u32, 1, 0]))?
        .open_piece(&PieceGeometry::Extent([2u32, 1, 0].into()))?
        .open_element(Section::Coordinates)?;
    let hx = vtk.add_data("x_coordinates", &x)?;
    let hy = vtk.add_data("y_coordinates", &y)?;
    let hz = vtk.add_data("z_coordinates", &z)?;
    vtk.close_element(Section::Coordinates)?;
    let hf = vtk.declare_fields(Location::Cell, &fields, None)?;
    vtk.close_piece()?.close_grid()?;
    vtk.append(hx, &x)?.append(hy, &y)?.append(hz, &z)?;
    vtk.append_fields(hf, &fields)?;
    let bytes = vtk.finish()?;
    let text = String::from_utf8(bytes).unwrap();

    let elements = parse_elements(&text);
    let grid = &elements[1];
    assert_eq!(grid.tag, "RectilinearGrid");
    assert_eq!(grid.attr("WholeExtent"), Some("0 2 0 1 0 0"));
    let cell_data = elements.iter().find(|e| e.tag == "CellData").unwrap();
    assert_eq!(cell_data.attr("scalars"), Some("p"));
    assert_eq!(cell_data.attr("vectors"), Some("v"));
    let appended_data = elements.iter().find(|e| e.tag == "AppendedData").unwrap();
    assert_eq!(appended_data.attr("encoding"), Some("base64"));

    let start = text.find("\n_").unwrap() + 2;
    let data = &text[start..text.find("\n</AppendedData>").unwrap()];
    let offsets: Vec<usize> = elements
        .iter()
        .filter(|e| e.tag == "DataArray")
        .map(|e| e.attr("offset").unwrap().parse().unwrap())
        .collect();
    // Each block is an 8 character encoded prefix followed by the encoded payload.
    assert_eq!(offsets, vec![0, 24, 44, 60, 80]);
    assert_eq!(data.len(), 80 + 8 + 64);

    let prefix = STANDARD.decode(&data[0..8]).unwrap();
    assert_eq!(Cursor::new(prefix).read_u32::<LE>().unwrap(), 12);
    let x_bytes = STANDARD.decode(&data[8..24]).unwrap();
    let mut cursor = Cursor::new(x_bytes);
    let xs: Vec<f32> = (0..3).map(|_| cursor.read_f32::<LE>().unwrap()).collect();
    assert_eq!(xs, vec![0.0, 1.0, 2.0]);
    Ok(())
}

#[test]
fn image_time_series() -> Result {
    init();
    let fields = vec![
        Field::scalars("rho", vec![1.0f64; 4])?,
        Field::new("uv", FieldKind::tcoords(2)?, vec![0.0f32; 8])?,
    ];
    let mut vtk = VtkFile::new(Vec::new(), GridKind::ImageData)?;
    vtk.open_grid(
        &GridGeometry::image([1u32, 1, 0], [0.0, 0.0, 0.0], [0.5, 0.5, 1.0]).with_time_steps(2),
    )?
    .open_piece(&PieceGeometry::Extent([1u32, 1, 0].into()))?;
    let handles = vtk.declare_fields(Location::Point, &fields, Some(2))?;
    let names: Vec<&str> = handles.iter().map(|h| h.name()).collect();
    assert_eq!(names, vec!["rho", "rho", "uv", "uv"]);
    vtk.close_piece()?.close_grid()?;
    for (handle, field) in handles.into_iter().zip([&fields[0], &fields[0], &fields[1], &fields[1]]) {
        vtk.append(handle, &field.data)?;
    }
    let bytes = vtk.finish()?;
    let elements = parse_elements(&header(&bytes));

    let grid = &elements[1];
    assert_eq!(grid.tag, "ImageData");
    assert_eq!(grid.attr("WholeExtent"), Some("0 1 0 1 0 0"));
    assert_eq!(grid.attr("Origin"), Some("0 0 0"));
    assert_eq!(grid.attr("Spacing"), Some("0.5 0.5 1"));
    assert_eq!(grid.attr("TimeValues"), Some("0 1"));

    let point_data = elements.iter().find(|e| e.tag == "PointData").unwrap();
    assert_eq!(point_data.attr("scalars"), Some("rho"));
    assert_eq!(point_data.attr("tcoords"), Some("uv"));

    let steps: Vec<(&str, &str, &str)> = elements
        .iter()
        .filter(|e| e.tag == "DataArray")
        .map(|e| {
            (
                e.attr("Name").unwrap(),
                e.attr("NumberOfComponents").unwrap(),
                e.attr("TimeStep").unwrap(),
            )
        })
        .collect();
    assert_eq!(
        steps,
        vec![("rho", "1", "0"), ("rho", "1", "1"), ("uv", "2", "0"), ("uv", "2", "1")]
    );
    Ok(())
}

#[test]
fn file_is_created_with_extension_and_saved_once() -> Result {
    init();
    let dir = tempfile::tempdir()?;
    let base = dir.path().join("grid");
    let mut vtk = VtkFile::create(&base, GridKind::StructuredGrid)?;
    assert_eq!(vtk.file_path(), Some(dir.path().join("grid.vts").as_path()));

    let points = Payload::xyz(vec![0.0f32, 1.0], vec![0.0f32; 2], vec![0.0f32; 2])?;
    vtk.open_grid(&GridGeometry::structured([1u32, 0, 0]))?
        .open_piece(&PieceGeometry::Extent([1u32, 0, 0].into()))?
        .open_element(Section::Points)?;
    let handle = vtk.add_data("points", &points)?;
    vtk.close_element(Section::Points)?
        .close_piece()?
        .close_grid()?
        .append(handle, &points)?;
    let path = vtk.save()?;
    assert_eq!(path, dir.path().join("grid.vts"));
    assert!(matches!(vtk.save(), Err(writer::Error::AlreadySaved)));

    let bytes = std::fs::read(&path)?;
    let elements = parse_elements(&header(&bytes));
    assert_eq!(elements[0].attr("type"), Some("StructuredGrid"));
    assert_eq!(elements[0].attr("header_type"), Some("UInt32"));
    assert_eq!(block(appended(&bytes), 0).len(), 24);
    Ok(())
}

#[test]
fn save_requires_all_appends() -> Result {
    init();
    let dir = tempfile::tempdir()?;
    let mut vtk = VtkFile::create(dir.path().join("partial"), GridKind::UnstructuredGrid)?;
    let data = Payload::from(vec![1i32, 2]);
    vtk.open_grid(&GridGeometry::unstructured())?
        .open_piece(&PieceGeometry::counts(2, 0))?
        .open_element(Section::PointData)?;
    let a = vtk.add_data("a", &data)?;
    let _b = vtk.add_data("b", &data)?;
    vtk.close_element(Section::PointData)?
        .close_piece()?
        .close_grid()?
        .append(a, &data)?;
    match vtk.save() {
        Err(writer::Error::MissingAppends(names)) => assert_eq!(names, vec!["b".to_string()]),
        other => panic!("unexpected result: {:?}", other),
    }
    Ok(())
}

#[test]
fn data_array_attribute_order() -> Result {
    init();
    let bytes = write_lines()?;
    let header = header(&bytes);
    let re = regex::Regex::new(
        r#"<DataArray type="(\w+)" Name="(\w+)" NumberOfComponents="(\d+)" format="appended" offset="(\d+)"/>"#,
    )
    .unwrap();
    let arrays: Vec<(String, String, u32, usize)> = re
        .captures_iter(&header)
        .map(|c| {
            (
                c[1].to_string(),
                c[2].to_string(),
                c[3].parse().unwrap(),
                c[4].parse().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        arrays,
        vec![
            ("Float64".to_string(), "points".to_string(), 3, 0),
            ("Int32".to_string(), "connectivity".to_string(), 1, 100),
            ("Int32".to_string(), "offsets".to_string(), 1, 120),
            ("UInt8".to_string(), "types".to_string(), 1, 132),
            ("Float64".to_string(), "temp".to_string(), 1, 138),
        ]
    );
    assert!(header.starts_with(
        "<?xml version=\"1.0\"?>\n<VTKFile type=\"UnstructuredGrid\" version=\"0.1\" \
         byte_order=\"LittleEndian\" header_type=\"UInt32\">\n<!-- two disjoint lines -->"
    ));
    Ok(())
}

#[test]
fn handles_are_bound_to_their_file() -> Result {
    init();
    let big = Payload::from(vec![0.0f64; 10]);
    let small = Payload::from(vec![1u8]);

    let mut a = VtkFile::new(Vec::new(), GridKind::UnstructuredGrid)?;
    a.open_grid(&GridGeometry::unstructured())?
        .open_piece(&PieceGeometry::counts(10, 0))?
        .open_element(Section::PointData)?;
    let big_handle = a.add_data("big", &big)?;

    let mut b = VtkFile::new(Vec::new(), GridKind::UnstructuredGrid)?;
    b.open_grid(&GridGeometry::unstructured())?
        .open_piece(&PieceGeometry::counts(1, 0))?
        .open_element(Section::PointData)?;
    let small_handle = b.add_data("small", &small)?;
    let next_handle = b.add_data("next", &small)?;
    b.close_element(Section::PointData)?
        .close_piece()?
        .close_grid()?;

    assert!(matches!(
        b.append(big_handle, &big),
        Err(writer::Error::ForeignHandle(_))
    ));
    assert!(matches!(
        b.append(next_handle, &small),
        Err(writer::Error::OutOfOrder { .. })
    ));
    b.append(small_handle, &small)?;
    let bytes = b.finish();
    assert!(matches!(bytes, Err(writer::Error::MissingAppends(names)) if names == vec!["next".to_string()]));
    Ok(())
}

#[test]
fn file_stays_consistent_after_rejected_payloads() -> Result {
    init();
    let small = Payload::from(vec![1u8]);
    let mut vtk = VtkFile::new(Vec::new(), GridKind::UnstructuredGrid)?;
    vtk.open_grid(&GridGeometry::unstructured())?
        .open_piece(&PieceGeometry::counts(1, 0))?
        .open_element(Section::PointData)?;
    assert!(vtk.add_data("sm\u{e5}ll", &small).is_err());
    let small_handle = vtk.add_data("small", &small)?;
    let next_handle = vtk.add_data("next", &small)?;
    vtk.close_element(Section::PointData)?
        .close_piece()?
        .close_grid()?;
    vtk.append(small_handle, &small)?;
    assert!(matches!(
        vtk.append(next_handle, &Payload::from(vec![0.0f64; 10])),
        Err(writer::Error::PayloadMismatch { .. })
    ));
    match vtk.finish() {
        Err(writer::Error::MissingAppends(names)) => assert_eq!(names, vec!["next".to_string()]),
        other => panic!("unexpected result: {:?}", other),
    }
    Ok(())
}
