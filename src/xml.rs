//!
//! Incremental writer for well-formed XML documents.
//!
//! The writer keeps a stack of open elements so that every closing tag is checked against the
//! element it closes. Text is restricted to ASCII and is emitted verbatim: no escaping of
//! special characters is performed, so names and attribute values must not contain `<`, `&` or
//! `"`.
//!

use std::fmt::Display;
use std::io::{self, Write};

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    /// A closing tag does not match the most recently opened element.
    UnmatchedClose { expected: Option<String>, found: String },
    /// Attempted to close an element while none are open.
    NoOpenElement,
    /// Attributes can only be added right after an element is opened.
    AttributeOutsideTag,
    /// The document was finished while some elements were still open.
    UnclosedElements(Vec<String>),
    /// Text outside the single byte character set used for output.
    NonAscii(String),
    /// An attribute value containing `"`, `<` or `&`, which would need escaping.
    SpecialCharacter(String),
    /// The underlying stream was already closed.
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IO(source) => write!(f, "IO error: {:?}", source),
            Error::UnmatchedClose {
                expected: Some(expected),
                found,
            } => write!(f, "Cannot close <{}> while <{}> is open", found, expected),
            Error::UnmatchedClose {
                expected: None,
                found,
            } => write!(f, "Cannot close <{}>: no element is open", found),
            Error::NoOpenElement => write!(f, "No element is open"),
            Error::AttributeOutsideTag => write!(f, "Attributes must follow an opening tag"),
            Error::UnclosedElements(tags) => write!(f, "Writer has unclosed elements: {:?}", tags),
            Error::NonAscii(text) => write!(f, "Text is not ASCII: {:?}", text),
            Error::SpecialCharacter(text) => {
                write!(f, "Attribute value contains a special character: {:?}", text)
            }
            Error::Closed => write!(f, "Writer is already closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(source) => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::IO(e)
    }
}

/// Check that `value` can be written verbatim as an attribute value.
pub fn check_value(value: &str) -> Result<(), Error> {
    if !value.is_ascii() {
        return Err(Error::NonAscii(value.to_string()));
    }
    if value.contains(['"', '<', '&']) {
        return Err(Error::SpecialCharacter(value.to_string()));
    }
    Ok(())
}

/// Streams XML markup to an underlying byte sink.
#[derive(Debug)]
pub struct XmlWriter<W: Write> {
    stream: Option<W>,
    /// Names of the currently open elements, innermost last.
    stack: Vec<String>,
    /// Set while the opening tag of the innermost element still accepts attributes.
    open_tag: bool,
}

impl<W: Write> XmlWriter<W> {
    /// Create a writer without emitting an XML declaration.
    pub fn new(stream: W) -> Self {
        XmlWriter {
            stream: Some(stream),
            stack: Vec::new(),
            open_tag: false,
        }
    }

    /// Create a writer and emit the `<?xml version="1.0"?>` declaration.
    pub fn with_declaration(stream: W) -> Result<Self, Error> {
        let mut writer = XmlWriter::new(stream);
        writer.write(b"<?xml version=\"1.0\"?>")?;
        Ok(writer)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.stream
            .as_mut()
            .ok_or(Error::Closed)?
            .write_all(bytes)?;
        Ok(())
    }

    fn write_str(&mut self, text: &str) -> Result<(), Error> {
        if !text.is_ascii() {
            return Err(Error::NonAscii(text.to_string()));
        }
        self.write(text.as_bytes())
    }

    /// Terminate a pending opening tag with `>`.
    fn end_open_tag(&mut self) -> Result<(), Error> {
        if self.open_tag {
            self.write(b">")?;
            self.open_tag = false;
        }
        Ok(())
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Name of the innermost open element.
    pub fn current(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    /// Write `<tag` and leave the tag open for attributes.
    pub fn open_element(&mut self, tag: &str) -> Result<&mut Self, Error> {
        if !tag.is_ascii() {
            return Err(Error::NonAscii(tag.to_string()));
        }
        self.end_open_tag()?;
        self.write(b"\n<")?;
        self.write(tag.as_bytes())?;
        self.stack.push(tag.to_string());
        self.open_tag = true;
        Ok(self)
    }

    /// Add a single `name="value"` pair to the element being opened.
    pub fn add_attribute(&mut self, name: &str, value: impl Display) -> Result<&mut Self, Error> {
        if !self.open_tag {
            return Err(Error::AttributeOutsideTag);
        }
        if !name.is_ascii() {
            return Err(Error::NonAscii(name.to_string()));
        }
        let value = value.to_string();
        check_value(&value)?;
        self.write(format!(" {}=\"{}\"", name, value).as_bytes())?;
        Ok(self)
    }

    /// Add attributes in the given order.
    pub fn add_attributes<K, V, I>(&mut self, attributes: I) -> Result<&mut Self, Error>
    where
        K: AsRef<str>,
        V: Display,
        I: IntoIterator<Item = (K, V)>,
    {
        if !self.open_tag {
            return Err(Error::AttributeOutsideTag);
        }
        for (name, value) in attributes {
            self.add_attribute(name.as_ref(), value)?;
        }
        Ok(self)
    }

    /// Close the innermost element.
    ///
    /// With a tag name, the name must match the innermost open element and a full `</tag>` is
    /// written. Without one, the element is closed as an empty `<tag/>`.
    pub fn close_element(&mut self, tag: Option<&str>) -> Result<&mut Self, Error> {
        match tag {
            Some(tag) => {
                if self.current() != Some(tag) {
                    return Err(Error::UnmatchedClose {
                        expected: self.stack.last().cloned(),
                        found: tag.to_string(),
                    });
                }
                self.end_open_tag()?;
                self.write(format!("\n</{}>", tag).as_bytes())?;
            }
            None => {
                if self.stack.is_empty() {
                    return Err(Error::NoOpenElement);
                }
                if self.open_tag {
                    self.write(b"/>")?;
                    self.open_tag = false;
                } else {
                    let tag = self.stack.last().cloned().unwrap_or_default();
                    self.write(format!("\n</{}>", tag).as_bytes())?;
                }
            }
        }
        self.stack.pop();
        Ok(self)
    }

    /// Write character data inside the innermost element.
    pub fn add_text(&mut self, text: &str) -> Result<&mut Self, Error> {
        if !text.is_ascii() {
            return Err(Error::NonAscii(text.to_string()));
        }
        if self.open_tag {
            self.write(b">\n")?;
            self.open_tag = false;
        }
        self.write_str(text)?;
        Ok(self)
    }

    /// Write raw bytes inside the innermost element.
    ///
    /// Used for binary appended data, which is not subject to the ASCII restriction.
    pub fn add_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, Error> {
        self.end_open_tag()?;
        self.write(bytes)?;
        Ok(self)
    }

    /// Write `<!-- text -->`.
    ///
    /// Comments are not checked for position; callers place them between sibling elements.
    pub fn add_comment(&mut self, text: &str) -> Result<&mut Self, Error> {
        if !text.is_ascii() {
            return Err(Error::NonAscii(text.to_string()));
        }
        self.end_open_tag()?;
        self.write(b"\n<!-- ")?;
        self.write_str(text)?;
        self.write(b" -->")?;
        Ok(self)
    }

    /// Finish the document, returning the underlying stream.
    ///
    /// Fails if any element is still open or if the writer was already closed.
    pub fn close(&mut self) -> Result<W, Error> {
        if self.stream.is_none() {
            return Err(Error::Closed);
        }
        if !self.stack.is_empty() {
            return Err(Error::UnclosedElements(self.stack.clone()));
        }
        self.write(b"\n")?;
        let mut stream = self.stream.take().ok_or(Error::Closed)?;
        stream.flush()?;
        Ok(stream)
    }
}
