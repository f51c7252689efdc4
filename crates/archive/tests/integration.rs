//! Integration tests for archive

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read, Write};

    use flate2::write::DeflateEncoder;
    use proptest::prelude::*;
    use sideload_archive::*;
    use sideload_errors::{ArchiveError, Error, InstallError};
    use sideload_events::{channel, BusMessage, Transition};
    use tempfile::TempDir;

    /// Archive written by the `zip` crate; sizes are in the local headers
    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn crc_of(data: &[u8]) -> u32 {
        let mut crc = flate2::Crc::new();
        crc.update(data);
        crc.sum()
    }

    /// Archive whose entries carry data descriptors, as written by streaming
    /// producers that cannot seek back to patch the local header
    fn streamed_zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, data) in entries {
            let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).unwrap();
            let compressed = encoder.finish().unwrap();
            let crc = crc_of(data);

            out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes()); // version needed
            out.extend_from_slice(&0x0008u16.to_le_bytes()); // data descriptor
            out.extend_from_slice(&8u16.to_le_bytes()); // deflate
            out.extend_from_slice(&[0u8; 4]); // time, date
            out.extend_from_slice(&[0u8; 12]); // crc and sizes follow the data
            out.extend_from_slice(&u16::try_from(name.len()).unwrap().to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&compressed);

            out.extend_from_slice(&0x0807_4b50u32.to_le_bytes());
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&u32::try_from(compressed.len()).unwrap().to_le_bytes());
            out.extend_from_slice(&u32::try_from(data.len()).unwrap().to_le_bytes());
        }
        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 18]);
        out
    }

    fn read_all_entries(bytes: &[u8]) -> Result<Vec<(String, Option<u64>, Vec<u8>)>, ArchiveError> {
        let mut zip = ZipStream::new(bytes);
        let mut entries = Vec::new();
        while let Some(mut entry) = zip.next_entry()? {
            let name = entry.name().to_string();
            let size = entry.size();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).map_err(|e| {
                ArchiveError::from_io_payload(&e).unwrap_or_else(|| ArchiveError::classify_io(&e, "test"))
            })?;
            entries.push((name, size, data));
        }
        Ok(entries)
    }

    /// Incompressible filler
    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state.to_le_bytes()[0]
            })
            .collect()
    }

    fn scratch() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn known_size_entries_round_trip() {
        let bytes = zip_of(&[("base.apk", &b"base bytes"[..]), ("config.xxhdpi.apk", &b"split"[..])]);
        let entries = read_all_entries(&bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "base.apk");
        assert_eq!(entries[0].1, Some(10));
        assert_eq!(entries[0].2, b"base bytes");
        assert_eq!(entries[1].2, b"split");
    }

    #[test]
    fn descriptor_entries_have_unknown_size() {
        let payload = vec![42u8; 100_000];
        let bytes = streamed_zip_of(&[("base.apk", &payload[..]), ("split_de.apk", &b"de"[..])]);
        let entries = read_all_entries(&bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, None);
        assert_eq!(entries[0].2, payload);
        assert_eq!(entries[1].2, b"de");
    }

    #[test]
    fn unread_entries_are_skipped() {
        for bytes in [
            zip_of(&[("a.bin", &[1u8; 5000][..]), ("b.bin", &b"second"[..])]),
            streamed_zip_of(&[("a.bin", &[1u8; 5000][..]), ("b.bin", &b"second"[..])]),
        ] {
            let mut zip = ZipStream::new(&bytes[..]);
            {
                let mut first = zip.next_entry().unwrap().unwrap();
                let mut partial = [0u8; 10];
                first.read_exact(&mut partial).unwrap();
            }
            let mut second = zip.next_entry().unwrap().unwrap();
            let mut data = String::new();
            second.read_to_string(&mut data).unwrap();
            assert_eq!(data, "second");
            drop(second);
            assert!(zip.next_entry().unwrap().is_none());
        }
    }

    #[test]
    fn corrupted_descriptor_crc_is_detected() {
        let mut bytes = streamed_zip_of(&[("base.apk", &b"payload bytes"[..])]);
        // descriptor crc sits 12 bytes before the end-of-central-directory record
        let crc_at = bytes.len() - 22 - 12;
        bytes[crc_at] ^= 0xFF;
        let err = read_all_entries(&bytes).unwrap_err();
        assert!(matches!(err, ArchiveError::CrcMismatch { .. }));
        assert!(err.is_structural());
    }

    #[test]
    fn trailing_non_entry_record_ends_stream() {
        let mut bytes = zip_of(&[("AndroidManifest.xml", &b"manifest"[..])]);
        // Insert a signing-block-like record before the central directory
        let central = bytes
            .windows(4)
            .position(|w| w == 0x0201_4b50u32.to_le_bytes())
            .unwrap();
        let block = [0x10u8, 0, 0, 0, 0, 0, 0, 0, b'A', b'P', b'K'];
        bytes.splice(central..central, block);
        let entries = read_all_entries(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn stored_entry_with_descriptor_is_structural() {
        let mut bytes = streamed_zip_of(&[("base.apk", &b"x"[..])]);
        bytes[8] = 0; // method: stored
        let err = ZipStream::new(&bytes[..]).next_entry().err().unwrap();
        assert!(matches!(err, ArchiveError::InvalidDescriptor { .. }));
    }

    #[test]
    fn raw_file_fallback_for_non_zip_bytes() {
        let dir = scratch();
        let source = MemorySource::new("app.bin", b"definitely not a zip".to_vec());
        assert_eq!(probe_layout(&source).unwrap(), SourceLayout::SinglePackage);

        let extracted = extract_representative(&source, dir.path()).unwrap();
        assert_eq!(extracted.origin(), &ExtractedFrom::WholeSource);
        assert_eq!(std::fs::read(extracted.path()).unwrap(), b"definitely not a zip");
    }

    #[test]
    fn base_apk_wins_regardless_of_position() {
        let dir = scratch();
        let bytes = zip_of(&[("b.apk", &b"bbb"[..]), ("base.apk", &b"base"[..]), ("a.apk", &b"aaa"[..])]);
        let source = MemorySource::new("bundle.apks", bytes);
        assert_eq!(probe_layout(&source).unwrap(), SourceLayout::Bundle);

        let extracted = extract_representative(&source, dir.path()).unwrap();
        assert_eq!(extracted.origin(), &ExtractedFrom::Entry("base.apk".to_string()));
        assert_eq!(std::fs::read(extracted.path()).unwrap(), b"base");
        assert_eq!(extracted.len(), 4);
    }

    #[test]
    fn first_apk_is_used_without_base() {
        let dir = scratch();
        let bytes = streamed_zip_of(&[
            ("icon.png", &b"png"[..]),
            ("splits/Main.APK", &b"main"[..]),
            ("splits/other.apk", &b"other"[..]),
        ]);
        let source = MemorySource::new("bundle.xapk", bytes).without_size_hint();
        let extracted = extract_representative(&source, dir.path()).unwrap();
        assert_eq!(
            extracted.origin(),
            &ExtractedFrom::Entry("splits/Main.APK".to_string())
        );
        assert_eq!(std::fs::read(extracted.path()).unwrap(), b"main");
    }

    #[test]
    fn bare_apk_is_a_single_package() {
        let dir = scratch();
        let bytes = zip_of(&[("AndroidManifest.xml", &b"\x03\x00"[..]), ("classes.dex", &b"dex"[..])]);
        let source = MemorySource::new("app.apk", bytes.clone());
        assert_eq!(probe_layout(&source).unwrap(), SourceLayout::SinglePackage);

        let extracted = extract_representative(&source, dir.path()).unwrap();
        assert_eq!(extracted.origin(), &ExtractedFrom::WholeSource);
        assert_eq!(std::fs::read(extracted.path()).unwrap(), bytes);
    }

    #[test]
    fn apk_with_embedded_package_asset_is_a_single_package() {
        let dir = scratch();
        let bytes = zip_of(&[
            ("AndroidManifest.xml", &b"\x03\x00"[..]),
            ("classes.dex", &b"dex"[..]),
            ("assets/plugin.apk", &b"plugin"[..]),
            ("resources.arsc", &b"arsc"[..]),
        ]);
        let source = MemorySource::new("host.apk", bytes.clone());
        assert_eq!(probe_layout(&source).unwrap(), SourceLayout::SinglePackage);

        let extracted = extract_representative(&source, dir.path()).unwrap();
        assert_eq!(extracted.origin(), &ExtractedFrom::WholeSource);
        assert_eq!(std::fs::read(extracted.path()).unwrap(), bytes);
        drop(extracted);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn manifest_after_a_split_still_decides() {
        let dir = scratch();
        let bytes = zip_of(&[
            ("lib/helper.apk", &b"helper"[..]),
            ("AndroidManifest.xml", &b"\x03\x00"[..]),
        ]);
        let source = MemorySource::new("host.apk", bytes);
        assert_eq!(probe_layout(&source).unwrap(), SourceLayout::SinglePackage);
        let extracted = extract_representative(&source, dir.path()).unwrap();
        assert_eq!(extracted.origin(), &ExtractedFrom::WholeSource);
        drop(extracted);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn zip_without_packages_is_rejected() {
        let dir = scratch();
        let source = MemorySource::new("photos.zip", zip_of(&[("a.jpg", &b"jpg"[..])]));
        assert_eq!(probe_layout(&source).unwrap(), SourceLayout::Bundle);

        let err = extract_representative(&source, dir.path()).unwrap_err();
        assert!(matches!(
            err,
            Error::Install(InstallError::NoInstallablePackageFound { .. })
        ));
        assert_eq!(err.to_string(), "install error: no valid package found in photos.zip");
    }

    #[test]
    fn extracted_file_is_removed_on_drop() {
        let dir = scratch();
        let source = MemorySource::new("bundle", zip_of(&[("base.apk", &b"base"[..])]));
        let extracted = extract_representative(&source, dir.path()).unwrap();
        let path = extracted.path().to_path_buf();
        assert!(path.exists());
        drop(extracted);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Delivers some bytes, then fails with the given error kind
    struct FlakySource {
        prefix: Vec<u8>,
        kind: io::ErrorKind,
    }

    struct FlakyReader {
        data: Cursor<Vec<u8>>,
        kind: io::ErrorKind,
    }

    impl Read for FlakyReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::new(self.kind, "provider went away")),
                n => Ok(n),
            }
        }
    }

    impl PackageSource for FlakySource {
        fn open(&self) -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(FlakyReader {
                data: Cursor::new(self.prefix.clone()),
                kind: self.kind,
            }))
        }

        fn size_hint(&self) -> Option<u64> {
            None
        }

        fn display_name(&self) -> String {
            "content://downloads/42".to_string()
        }
    }

    #[test]
    fn io_errors_are_not_masked_as_not_a_zip() {
        let dir = scratch();
        let bytes = zip_of(&[("assets/blob.bin", &noise(4096)[..]), ("base.apk", &b"base"[..])]);

        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::InvalidData,
            io::ErrorKind::InvalidInput,
        ] {
            let source = FlakySource {
                prefix: bytes[..100].to_vec(),
                kind,
            };

            let err = probe_layout(&source).unwrap_err();
            assert!(
                matches!(err, Error::Install(InstallError::SourceUnreadable { .. })),
                "{kind:?}: {err}"
            );

            let err = extract_representative(&source, dir.path()).unwrap_err();
            assert!(
                matches!(err, Error::Install(InstallError::SourceUnreadable { .. })),
                "{kind:?}: {err}"
            );
            assert!(err.to_string().contains("provider went away"));
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failure_inside_entry_data_is_source_unreadable() {
        let dir = scratch();
        let bytes = zip_of(&[("base.apk", &noise(8192)[..])]);
        let source = FlakySource {
            prefix: bytes[..2048].to_vec(),
            kind: io::ErrorKind::UnexpectedEof,
        };

        let err = extract_representative(&source, dir.path()).unwrap_err();
        assert!(matches!(err, Error::Install(InstallError::SourceUnreadable { .. })), "{err}");
    }

    #[test]
    fn missing_file_is_source_unreadable() {
        let dir = scratch();
        let source = FileSource::new(dir.path().join("missing.apk"));
        assert_eq!(source.size_hint(), None);
        let err = extract_representative(&source, dir.path()).unwrap_err();
        assert!(err.to_string().contains("cannot open source"));
    }

    /// Hands out the input in caller-chosen chunk sizes
    struct Chunked<'a> {
        data: &'a [u8],
        chunks: Vec<usize>,
        next: usize,
    }

    impl Read for Chunked<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunks[self.next % self.chunks.len()].max(1);
            self.next += 1;
            let n = chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    proptest! {
        #[test]
        fn progress_is_monotonic_for_any_chunking(
            len in 1usize..20_000,
            chunks in prop::collection::vec(1usize..4096, 1..16),
        ) {
            let data = vec![0xA5u8; len];
            let (tx, mut rx) = channel();
            let inner = Chunked { data: &data, chunks, next: 0 };
            let mut reader = ProgressReader::new(inner, Some(len as u64), tx);
            io::copy(&mut reader, &mut io::sink()).unwrap();

            let mut values = Vec::new();
            while let Ok(BusMessage::Transition(Transition::Progress(p))) = rx.try_recv() {
                values.push(p);
            }
            prop_assert!(values.len() <= 100);
            prop_assert!(values.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(values.iter().all(|p| *p > 0.0 && *p <= 1.0));
            prop_assert_eq!(reader.last_emitted_percent(), 100);
            prop_assert_eq!(values.last().copied(), Some(1.0));
        }
    }
}
