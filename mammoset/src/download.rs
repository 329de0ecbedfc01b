use std::{
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
};

use crate::error::Error;

const S3_BASE: &str = "https://s3.eu-central-1.amazonaws.com/aws.skoo.ch/files/";

/// Directory holding downloaded archives, extracted contents and cached
/// array/record files.
pub const DATA_DIR: &str = "data";

/// One of the pre-built mammography datasets hosted on S3. Identifier 0 is
/// the MIAS evaluation set; the numbered DDSM revisions differ in how the
/// scans were sliced and labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    Mias,
    Ddsm4,
    Ddsm5,
    Ddsm6,
    Ddsm8,
    Ddsm9,
}

impl Dataset {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Mias),
            4 => Some(Self::Ddsm4),
            5 => Some(Self::Ddsm5),
            6 => Some(Self::Ddsm6),
            8 => Some(Self::Ddsm8),
            9 => Some(Self::Ddsm9),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::Mias => 0,
            Self::Ddsm4 => 4,
            Self::Ddsm5 => 5,
            Self::Ddsm6 => 6,
            Self::Ddsm8 => 8,
            Self::Ddsm9 => 9,
        }
    }

    /// The remote files making up this dataset bundle: five training record
    /// archives plus the test and cross-validation arrays. Dataset 4 was
    /// never published to the bucket, so its list is empty.
    pub fn remote_files(self) -> Vec<RemoteFile> {
        match self {
            Self::Mias => vec![
                RemoteFile::renamed("all_mias_slices.npy", "mias_test_images.npy"),
                RemoteFile::renamed("all_mias_labels.npy", "mias_test_labels_enc.npy"),
                RemoteFile::plain("all_mias_slices9.npy"),
                RemoteFile::plain("all_mias_labels9.npy"),
            ],
            Self::Ddsm4 => Vec::new(),
            _ => {
                let n = self.id();
                let mut files: Vec<RemoteFile> = (0..5)
                    .map(|i| {
                        RemoteFile::archive(
                            format!("training{n}_{i}.zip"),
                            format!("training{n}_{i}.tfrecords"),
                        )
                    })
                    .collect();
                files.push(RemoteFile::archive(
                    format!("test{n}_data.zip"),
                    format!("test{n}_data.npy"),
                ));
                files.push(RemoteFile::plain(format!("test{n}_filenames.npy")));
                files.push(RemoteFile::plain(format!("test{n}_labels.npy")));
                files.push(RemoteFile::archive(
                    format!("cv{n}_data.zip"),
                    format!("cv{n}_data.npy"),
                ));
                files.push(RemoteFile::plain(format!("cv{n}_labels.npy")));
                files.push(RemoteFile::plain(format!("cv{n}_filenames.npy")));
                files
            }
        }
    }

    /// Paths of the training record files under `data_dir`. MIAS is an
    /// evaluation-only set and has none.
    pub fn training_files(self, data_dir: &Path) -> Vec<PathBuf> {
        match self {
            Self::Mias => Vec::new(),
            _ => {
                let n = self.id();
                (0..5)
                    .map(|i| data_dir.join(format!("training{n}_{i}.tfrecords")))
                    .collect()
            }
        }
    }

    /// Total examples across the training record files. The counts are fixed
    /// properties of the published bundles; nothing validates them against
    /// the file contents.
    pub fn total_records(self) -> usize {
        match self {
            Self::Mias => 0,
            Self::Ddsm4 => 41527,
            Self::Ddsm5 => 39316,
            Self::Ddsm6 => 62764,
            Self::Ddsm8 => 40559,
            Self::Ddsm9 => 43739,
        }
    }
}

/// A file on the bucket together with its local name and the file whose
/// presence means the download can be skipped (for archives that is the
/// extracted file, not the archive itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub remote: String,
    pub name: String,
    pub target: String,
}

impl RemoteFile {
    fn plain(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            remote: name.clone(),
            target: name.clone(),
            name,
        }
    }

    fn renamed(remote: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            remote: remote.into(),
            target: name.clone(),
            name,
        }
    }

    fn archive(name: impl Into<String>, target: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            remote: name.clone(),
            name,
            target: target.into(),
        }
    }

    pub fn url(&self) -> String {
        format!("{S3_BASE}{}", self.remote)
    }
}

fn ensure_dir(path: &Path) -> Result<(), Error> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Download `url` into `data_dir` under `name`, skipping the transfer when
/// the file already exists.
///
/// The body streams to `<name>.part` and is renamed into place once the
/// transfer completes, so an error status or a dropped connection leaves no
/// file behind to suppress the retry on the next run.
pub fn download_file(url: &str, name: &str, data_dir: &Path) -> Result<PathBuf, Error> {
    ensure_dir(data_dir)?;
    let downloaded_file = data_dir.join(name);
    if downloaded_file.exists() {
        log::info!("File already exists: {}", downloaded_file.display());
        return Ok(downloaded_file);
    }

    log::info!("Downloading {} to: {}", url, downloaded_file.display());
    let mut response = reqwest::blocking::get(url)?.error_for_status()?;

    let partial = data_dir.join(format!("{name}.part"));
    match stream_to_file(&mut response, &partial) {
        Ok(()) => {
            fs::rename(&partial, &downloaded_file)?;
            Ok(downloaded_file)
        }
        Err(err) => {
            let _ = fs::remove_file(&partial);
            Err(err)
        }
    }
}

fn stream_to_file(response: &mut reqwest::blocking::Response, path: &Path) -> Result<(), Error> {
    let mut dest = File::create(path)?;
    let pb = indicatif::ProgressBar::new(response.content_length().unwrap_or(0));
    let mut buf = [0; 262144]; // 256KiB buffer
    loop {
        let n = response.read(&mut buf)?;
        if n == 0 {
            break;
        }
        dest.write_all(&buf[..n])?;
        pb.inc(n as u64);
    }
    Ok(())
}

/// Extract a `.zip` archive into `dest`.
pub fn unzip(archive: &Path, dest: &Path) -> Result<(), Error> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    log::info!(
        "Extracting archive {} to: {}",
        archive.display(),
        dest.display()
    );
    zip.extract(dest)?;
    Ok(())
}

/// Fetch every file of `dataset` that is not already present in the default
/// data directory. Archives are extracted in place and deleted afterwards to
/// save disk space.
///
/// Failures are logged and skipped rather than propagated: a flaky transfer
/// leaves a gap the caller has to tolerate, it never aborts the rest of the
/// bundle.
pub fn download_data(dataset: Dataset) {
    download_data_to(dataset, Path::new(DATA_DIR))
}

pub fn download_data_to(dataset: Dataset, data_dir: &Path) {
    for file in dataset.remote_files() {
        let target = data_dir.join(&file.target);
        if target.exists() {
            log::debug!("{} already present, skipping", target.display());
            continue;
        }

        let downloaded = match download_file(&file.url(), &file.name, data_dir) {
            Ok(path) => path,
            Err(err) => {
                log::warn!("Error downloading {}: {}", file.url(), err);
                continue;
            }
        };

        if file.name.contains("zip") {
            if let Err(err) = unzip(&downloaded, data_dir) {
                log::warn!("Error extracting {}: {}", downloaded.display(), err);
                continue;
            }
            match fs::remove_file(&downloaded) {
                Ok(()) => log::info!("Zip file extracted and deleted: {}", file.name),
                Err(err) => log::warn!("Error deleting zip file {}: {}", file.name, err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, net::TcpListener, thread};

    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mammoset-{}-{}", tag, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Serve a single canned HTTP response on a local port.
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request);
            let response = format!(
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{addr}/files/cv5_labels.npy")
    }

    #[test]
    fn dataset_ids_round_trip() {
        for id in [0u8, 4, 5, 6, 8, 9] {
            let dataset = Dataset::from_id(id).unwrap();
            assert_eq!(dataset.id(), id);
        }
        assert_eq!(Dataset::from_id(7), None);
    }

    #[test]
    fn ddsm_bundles_list_all_files() {
        let files = Dataset::Ddsm5.remote_files();
        assert_eq!(files.len(), 11);
        assert_eq!(files[0].name, "training5_0.zip");
        assert_eq!(files[0].target, "training5_0.tfrecords");
        assert_eq!(
            files[0].url(),
            "https://s3.eu-central-1.amazonaws.com/aws.skoo.ch/files/training5_0.zip"
        );
        assert!(files.iter().any(|f| f.name == "cv5_labels.npy"));
        assert!(files.iter().any(|f| f.target == "test5_data.npy"));
    }

    #[test]
    fn mias_files_are_renamed_on_download() {
        let files = Dataset::Mias.remote_files();
        let slices = files
            .iter()
            .find(|f| f.remote == "all_mias_slices.npy")
            .unwrap();
        assert_eq!(slices.name, "mias_test_images.npy");
    }

    #[test]
    fn training_files_and_counts() {
        let files = Dataset::Ddsm9.training_files(Path::new("data"));
        assert_eq!(files.len(), 5);
        assert_eq!(files[4], Path::new("data").join("training9_4.tfrecords"));
        assert_eq!(Dataset::Ddsm9.total_records(), 43739);
        assert!(Dataset::Mias.training_files(Path::new("data")).is_empty());
    }

    #[test]
    fn download_file_writes_the_body_on_success() {
        let dir = temp_dir("download-ok");
        let url = serve_once("HTTP/1.1 200 OK", "label bytes");
        let path = download_file(&url, "cv5_labels.npy", &dir).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "label bytes");
        assert!(!dir.join("cv5_labels.npy.part").exists());
    }

    #[test]
    fn failed_download_leaves_nothing_behind() {
        let dir = temp_dir("download-404");
        let url = serve_once("HTTP/1.1 404 Not Found", "<Error>NoSuchKey</Error>");
        let result = download_file(&url, "cv5_labels.npy", &dir);
        assert!(matches!(result, Err(Error::Reqwest(_))));
        assert!(!dir.join("cv5_labels.npy").exists());
        assert!(!dir.join("cv5_labels.npy.part").exists());
    }

    #[test]
    fn unzip_reproduces_archived_files() {
        let dir = temp_dir("unzip");
        let archive_path = dir.join("sample.zip");

        let file = File::create(&archive_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        writer.start_file("a.txt", options).unwrap();
        writer.write_all(b"alpha").unwrap();
        writer.start_file("b.txt", options).unwrap();
        writer.write_all(b"beta").unwrap();
        writer.finish().unwrap();

        unzip(&archive_path, &dir).unwrap();
        assert_eq!(fs::read_to_string(dir.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(dir.join("b.txt")).unwrap(), "beta");
    }
}
