//! Extract download.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use common_error::{AnserError, AnserResult};

use crate::catalog::Extract;

/// Download an extract's PBF file into `directory`.
///
/// An existing file is a cache hit and is returned untouched. The download
/// streams into a `.part` file and renames on success, so an interrupted
/// transfer never masquerades as a finished one.
pub fn download_extract(extract: &Extract, directory: &Path) -> AnserResult<PathBuf> {
    fs::create_dir_all(directory)?;
    let target = directory.join(format!("{}.osm.pbf", extract.file_name));
    if target.exists() {
        tracing::debug!(path = %target.display(), "extract already downloaded");
        return Ok(target);
    }

    tracing::debug!(url = %extract.url, "downloading extract");
    let response = ureq::get(&extract.url)
        .call()
        .map_err(AnserError::external)?;

    let partial = directory.join(format!("{}.osm.pbf.part", extract.file_name));
    let mut reader = response.into_reader();
    let mut file = fs::File::create(&partial)?;
    io::copy(&mut reader, &mut file)?;
    drop(file);

    fs::rename(&partial, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::MultiPolygon;

    #[test]
    fn test_existing_file_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let extract = Extract {
            id: "x".to_string(),
            name: "x".to_string(),
            file_name: "x".to_string(),
            parent: None,
            // Unreachable on purpose; the cached file must win.
            url: "http://127.0.0.1:1/x.osm.pbf".to_string(),
            geometry: MultiPolygon(vec![]),
            area_km2: 0.0,
        };
        let cached = dir.path().join("x.osm.pbf");
        fs::write(&cached, b"pbf bytes").unwrap();

        let path = download_extract(&extract, dir.path()).unwrap();
        assert_eq!(path, cached);
        assert_eq!(fs::read(&path).unwrap(), b"pbf bytes");
    }

    #[test]
    fn test_unreachable_url_fails() {
        let dir = tempfile::tempdir().unwrap();
        let extract = Extract {
            id: "y".to_string(),
            name: "y".to_string(),
            file_name: "y".to_string(),
            parent: None,
            url: "http://127.0.0.1:1/y.osm.pbf".to_string(),
            geometry: MultiPolygon(vec![]),
            area_km2: 0.0,
        };
        assert!(download_extract(&extract, dir.path()).is_err());
        assert!(!dir.path().join("y.osm.pbf").exists());
    }
}
