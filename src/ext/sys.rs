use std::{
    io::{self, Read, BufRead, BufReader, Write, BufWriter, Seek, SeekFrom},
    fs::{self, File},
    path::{Path, PathBuf},
    ffi::OsStr,
    process::Child,
    time::SystemTime,
};
use flate2::bufread::MultiGzDecoder;
use crate::err::{Error, add_path};

/// Finds an executable, and returns Error, if executable is not available.
pub fn find_exe(p: impl AsRef<Path>) -> Result<PathBuf, Error> {
    which::which(p.as_ref()).map_err(|_| Error::NoExec(p.as_ref().to_owned()))
}

/// Returns
/// - gzip reader if the file starts with the gzip magic number,
/// - regular text file otherwise.
pub fn open(filename: &Path) -> Result<Box<dyn BufRead + Send>, Error> {
    let mut stream = BufReader::new(File::open(filename).map_err(add_path!(filename))?);
    let mut two_bytes = [0_u8; 2];
    let bytes_read = stream.read(&mut two_bytes).map_err(add_path!(filename))?;
    stream.seek_relative(-(bytes_read as i64)).map_err(add_path!(filename))?;
    // Check gzip magic number.
    if bytes_read == 2 && two_bytes[0] == 0x1f && two_bytes[1] == 0x8b {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(stream))))
    } else {
        Ok(Box::new(stream))
    }
}

/// Creates buffered file.
pub fn create_file(filename: &Path) -> Result<BufWriter<File>, Error> {
    File::create(filename).map_err(add_path!(filename)).map(BufWriter::new)
}

/// Loads full JSON contents from a file.
pub fn load_json(filename: &Path) -> Result<json::JsonValue, Error> {
    let contents = fs::read_to_string(filename).map_err(add_path!(filename))?;
    json::parse(&contents).map_err(|e| Error::JsonLoad(format!("{} ({})", e, crate::ext::fmt::path(filename))))
}

/// Returns a path with a new suffix appended to the end.
pub fn append_path(path: &Path, suffix: impl AsRef<OsStr>) -> PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(suffix.as_ref());
    os_string.into()
}

/// Create directory together with all missing parents, if it does not exist yet.
pub fn mkdir(path: impl AsRef<Path>) -> Result<(), Error> {
    let path = path.as_ref();
    if !path.is_dir() {
        fs::create_dir_all(path).map_err(add_path!(path))
    } else {
        Ok(())
    }
}

/// Removes file if it exists.
pub fn remove_if_exists(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        res => res.map_err(add_path!(path)),
    }
}

/// Returns file size, or None if the file does not exist.
pub fn file_size(path: &Path) -> Result<Option<u64>, Error> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e, vec![path.to_owned()])),
    }
}

/// Returns last modification time, or None if the file does not exist.
pub fn modified(path: &Path) -> Result<Option<SystemTime>, Error> {
    match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(time) => Ok(Some(time)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e, vec![path.to_owned()])),
    }
}

/// Empty BGZF block, written at the end of every complete BGZF file (SAM/BAM specification, 4.1.2).
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43,
    0x02, 0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Returns true if the file ends with the BGZF end-of-file marker.
pub fn has_bgzf_eof(path: &Path) -> Result<bool, Error> {
    let mut file = File::open(path).map_err(add_path!(path))?;
    let size = file.metadata().map_err(add_path!(path))?.len();
    if size < BGZF_EOF.len() as u64 {
        return Ok(false);
    }
    let mut tail = [0_u8; BGZF_EOF.len()];
    file.seek(SeekFrom::End(-(BGZF_EOF.len() as i64))).map_err(add_path!(path))?;
    file.read_exact(&mut tail).map_err(add_path!(path))?;
    Ok(tail == BGZF_EOF)
}

/// Copies contents of all files (gzip decompressed if needed) into a single writer.
pub fn concat_files(filenames: &[PathBuf], mut writer: impl Write) -> Result<(), Error> {
    for filename in filenames {
        let mut reader = open(filename)?;
        io::copy(&mut reader, &mut writer).map_err(add_path!(filename))?;
    }
    writer.flush().map_err(add_path!(!))
}

/// RAII child wrapper, that kills the child if it gets dropped.
pub struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    pub fn new(child: Child) -> Self {
        Self {
            child,
            armed: true,
        }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.armed {
            match self.child.kill() {
                Err(e) => {
                    // InvalidInput means that the process exited already.
                    if e.kind() != io::ErrorKind::InvalidInput {
                        log::error!("Could not kill child process: {}", e);
                    }
                }
                Ok(_) => {
                    let _ = self.child.wait();
                    log::error!("Successfully killed child process");
                }
            }
        }
    }
}
