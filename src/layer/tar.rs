use crate::{
    errors::ImageError,
    filesystem::{
        merge::LayerTree,
        vfs::{mkdev, mode, FileData, Filesystem, Stat},
    },
};
use ::tar::{Archive, Entry, EntryType};
use bytes::Bytes;
use std::{
    convert::TryInto,
    io::{Cursor, Read},
};

const BLOCK_LEN: usize = 512;

/// Decode an uncompressed tar layer
///
/// File contents are zero-copy slices of the archive.
pub fn decode(archive: Bytes) -> Result<LayerTree, ImageError> {
    if archive.len() % BLOCK_LEN != 0 {
        return Err(ImageError::TARFileError);
    }
    let mut tree = LayerTree::new(Filesystem::new());
    let mut reader = Archive::new(Cursor::new(&archive[..]));
    for entry in reader.entries()? {
        let entry = entry?;
        let file_begin = entry.raw_file_position() as usize;
        let file_end = file_begin
            .checked_add(entry.size() as usize)
            .filter(|end| *end <= archive.len())
            .ok_or(ImageError::TARFileError)?;
        let data = if file_end == file_begin {
            FileData::Empty
        } else {
            FileData::Memory(archive.slice(file_begin..file_end))
        };
        extract_file_metadata(&mut tree, entry, data)?;
    }
    Ok(tree)
}

fn extract_file_metadata<'a, R: Read>(
    tree: &mut LayerTree,
    entry: Entry<'a, R>,
    data: FileData,
) -> Result<(), ImageError> {
    let header = entry.header();
    let kind = header.entry_type();
    let path = entry.path()?.into_owned();
    if kind != EntryType::Directory && tree.record_whiteout(&path) {
        return Ok(());
    }
    let link_name = entry.link_name()?.map(|name| name.into_owned());
    let stat = Stat {
        st_mode: header.mode()? & mode::PERMISSIONS,
        st_uid: header
            .uid()?
            .try_into()
            .map_err(|_| ImageError::TARFileError)?,
        st_gid: header
            .gid()?
            .try_into()
            .map_err(|_| ImageError::TARFileError)?,
        ..Default::default()
    }
    .with_times(header.mtime()?, 0);
    let with_type = |file_type: u32, st_size: u64| Stat {
        st_mode: stat.st_mode | file_type,
        st_size,
        ..stat.clone()
    };

    let mut fsw = tree.fs.writer();
    match kind {
        EntryType::Directory => {
            fsw.write_directory_metadata(&path, with_type(mode::S_IFDIR, 0))?;
        }
        EntryType::Regular | EntryType::Continuous => {
            fsw.write_file(&path, with_type(mode::S_IFREG, entry.size()), data)?;
        }
        EntryType::Symlink => match link_name {
            Some(link_name) => {
                let size = link_name.as_os_str().len() as u64;
                fsw.write_symlink(&path, with_type(mode::S_IFLNK, size), link_name.as_os_str())?;
            }
            None => return Err(ImageError::TARFileError),
        },
        EntryType::Link => match link_name {
            Some(link_name) => fsw.write_hardlink(&path, &link_name)?,
            None => return Err(ImageError::TARFileError),
        },
        EntryType::Char | EntryType::Block => {
            // blank device fields are only an error for device nodes
            let (major, minor) = match (header.device_major()?, header.device_minor()?) {
                (Some(major), Some(minor)) => (major, minor),
                _ => return Err(ImageError::TARFileError),
            };
            let file_type = if kind == EntryType::Char {
                mode::S_IFCHR
            } else {
                mode::S_IFBLK
            };
            let stat = Stat {
                st_rdev: mkdev(major, minor),
                ..with_type(file_type, 0)
            };
            fsw.write_special(&path, stat)?;
        }
        EntryType::Fifo => {
            fsw.write_special(&path, with_type(mode::S_IFIFO, 0))?;
        }
        _ => log::error!(
            "skipping unsupported tar file entry type {:?}, {:?}",
            kind,
            path
        ),
    }
    Ok(())
}
