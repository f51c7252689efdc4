//! Integration tests for install crate

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Write};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use flate2::write::DeflateEncoder;
    use sideload_archive::{ExtractedFrom, MemorySource, PackageSource};
    use sideload_errors::{Error, InstallError, PlatformError};
    use sideload_events::{channel, spawn_forwarder, InstallEventBus, Subscription};
    use sideload_install::*;
    use sideload_platform::{
        CommitCallback, InstallSession, InstallerService, ManifestParser, PackageQuery,
        ParsedManifest, SessionParams, SessionWriter,
    };
    use sideload_types::{FailureKind, InstallState, SessionId, StatusReport};
    use tempfile::TempDir;

    const PACKAGE_ID: &str = "org.example.notes";

    // ---- fixtures ----

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

    /// Entries with data descriptors, so their sizes are unknown up front
    fn streamed_zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, data) in entries {
            let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).unwrap();
            let compressed = encoder.finish().unwrap();

            out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0x0008u16.to_le_bytes());
            out.extend_from_slice(&8u16.to_le_bytes());
            out.extend_from_slice(&[0u8; 16]);
            out.extend_from_slice(&u16::try_from(name.len()).unwrap().to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&compressed);

            out.extend_from_slice(&0x0807_4b50u32.to_le_bytes());
            out.extend_from_slice(&crc_of(data).to_le_bytes());
            out.extend_from_slice(&u32::try_from(compressed.len()).unwrap().to_le_bytes());
            out.extend_from_slice(&u32::try_from(data.len()).unwrap().to_le_bytes());
        }
        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 18]);
        out
    }

    fn filler(len: usize) -> Vec<u8> {
        (0..len).map(|i| b'0' + u8::try_from(i % 10).unwrap()).collect()
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    // ---- platform fakes ----

    #[derive(Debug, Clone)]
    struct WrittenEntry {
        name: String,
        declared: u64,
        bytes: Vec<u8>,
        synced: bool,
    }

    #[derive(Debug, Default)]
    struct Recorded {
        created: usize,
        entries: Vec<WrittenEntry>,
        committed: bool,
        abandoned: bool,
        closed: bool,
    }

    #[derive(Debug, Clone, Copy)]
    enum Verdict {
        Success,
        ConfirmThenSuccess,
        Fail(FailureKind),
    }

    #[derive(Clone)]
    struct FakeInstaller {
        log: Arc<Mutex<Recorded>>,
        verdict: Verdict,
        fail_create: bool,
        fail_writes: bool,
    }

    impl FakeInstaller {
        fn new(verdict: Verdict) -> Self {
            Self {
                log: Arc::default(),
                verdict,
                fail_create: false,
                fail_writes: false,
            }
        }
    }

    impl InstallerService for FakeInstaller {
        fn create_session(&self, _params: &SessionParams) -> Result<SessionId, Error> {
            if self.fail_create {
                return Err(InstallError::SessionCreateFailure {
                    operation: "create".into(),
                    message: "device offline".into(),
                }
                .into());
            }
            self.log.lock().unwrap().created += 1;
            Ok(SessionId(42))
        }

        fn open_session(&self, session_id: SessionId) -> Result<Box<dyn InstallSession>, Error> {
            Ok(Box::new(FakeSession {
                id: session_id,
                installer: self.clone(),
            }))
        }
    }

    struct FakeSession {
        id: SessionId,
        installer: FakeInstaller,
    }

    impl InstallSession for FakeSession {
        fn session_id(&self) -> SessionId {
            self.id
        }

        fn open_write(
            &mut self,
            name: &str,
            offset: u64,
            length: u64,
        ) -> Result<Box<dyn SessionWriter>, Error> {
            assert_eq!(offset, 0);
            assert!(!name.contains('/'));
            let mut log = self.installer.log.lock().unwrap();
            log.entries.push(WrittenEntry {
                name: name.to_string(),
                declared: length,
                bytes: Vec::new(),
                synced: false,
            });
            Ok(Box::new(FakeWriter {
                log: Arc::clone(&self.installer.log),
                index: log.entries.len() - 1,
                fail: self.installer.fail_writes,
            }))
        }

        fn commit(&mut self, callback: Arc<dyn CommitCallback>) -> Result<(), Error> {
            self.installer.log.lock().unwrap().committed = true;
            let reports = match self.installer.verdict {
                Verdict::Success => vec![StatusReport::success(self.id)],
                Verdict::ConfirmThenSuccess => vec![
                    StatusReport::pending(self.id, "confirm-token"),
                    StatusReport::success(self.id),
                ],
                Verdict::Fail(kind) => vec![StatusReport::failure(self.id, kind, None)],
            };
            for report in reports {
                callback.on_status(report);
            }
            Ok(())
        }

        fn abandon(&mut self) -> Result<(), Error> {
            self.installer.log.lock().unwrap().abandoned = true;
            Ok(())
        }

        fn close(&mut self) {
            self.installer.log.lock().unwrap().closed = true;
        }
    }

    struct FakeWriter {
        log: Arc<Mutex<Recorded>>,
        index: usize,
        fail: bool,
    }

    impl Write for FakeWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::other("device storage full"));
            }
            self.log.lock().unwrap().entries[self.index]
                .bytes
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SessionWriter for FakeWriter {
        fn fsync(&mut self) -> Result<(), Error> {
            let mut log = self.log.lock().unwrap();
            let entry = &mut log.entries[self.index];
            if entry.bytes.len() as u64 != entry.declared {
                return Err(Error::internal("length mismatch"));
            }
            entry.synced = true;
            Ok(())
        }

        fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    /// Accepts any file that does not contain the word "corrupt"
    struct FakeParser;

    impl ManifestParser for FakeParser {
        fn parse(&self, path: &Path) -> Result<ParsedManifest, Error> {
            let bytes = std::fs::read(path).unwrap();
            if bytes.windows(7).any(|w| w == b"corrupt") {
                return Err(PlatformError::ManifestUnreadable {
                    message: "ERROR: dump failed because no AndroidManifest.xml found".into(),
                }
                .into());
            }
            Ok(ParsedManifest {
                package_id: PACKAGE_ID.into(),
                label: Some("Notes".into()),
                version_name: None,
                icon: None,
            })
        }
    }

    struct FakeQuery {
        installed: Vec<String>,
    }

    impl PackageQuery for FakeQuery {
        fn is_installed(&self, package_id: &str) -> Result<bool, Error> {
            Ok(self.installed.iter().any(|id| id == package_id))
        }
    }

    // ---- harness ----

    struct Harness {
        controller: InstallerController,
        log: Arc<Mutex<Recorded>>,
        scratch: TempDir,
    }

    fn harness_with_bus(installer: FakeInstaller, installed: &[&str], bus: InstallEventBus) -> Harness {
        let scratch = TempDir::new().unwrap();
        let log = Arc::clone(&installer.log);
        let analyzer = PackageAnalyzer::new(
            Arc::new(FakeParser),
            Arc::new(FakeQuery {
                installed: installed.iter().map(ToString::to_string).collect(),
            }),
            scratch.path(),
        );
        let pipeline = SessionPipeline::new(
            Arc::new(installer),
            PipelineConfig::default()
                .with_chunk_size(4096)
                .with_scratch_dir(scratch.path()),
        );
        let controller =
            InstallerController::new(Arc::new(bus), Arc::new(analyzer), Arc::new(pipeline));
        Harness {
            controller,
            log,
            scratch,
        }
    }

    fn harness(installer: FakeInstaller) -> Harness {
        harness_with_bus(installer, &[], InstallEventBus::new(1, 512))
    }

    fn drain(subscription: &mut Subscription) -> Vec<InstallState> {
        let mut states = Vec::new();
        while let Some(state) = subscription.try_recv() {
            states.push(state);
        }
        states
    }

    fn source(name: &str, bytes: Vec<u8>) -> Arc<dyn PackageSource> {
        Arc::new(MemorySource::new(name, bytes))
    }

    // ---- tests ----

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_size_entries_are_written_exactly() {
        let base = filler(300_000);
        let split = filler(5_000);
        let bundle = streamed_zip_of(&[
            ("icon.png", &b"png"[..]),
            ("base.apk", &base[..]),
            ("splits/config.xxhdpi.apk", &split[..]),
        ]);
        let h = harness(FakeInstaller::new(Verdict::Success));
        let src: Arc<dyn PackageSource> =
            Arc::new(MemorySource::new("notes.xapk", bundle).without_size_hint());

        let state = h.controller.select_source(src).await.unwrap();
        assert!(matches!(state, InstallState::ReadyToInstall { .. }));
        let state = h.controller.confirm_install().await.unwrap();
        assert_eq!(state, InstallState::Success);

        let log = h.log.lock().unwrap();
        assert!(log.committed);
        assert!(!log.abandoned);
        assert!(log.closed);
        assert_eq!(log.entries.len(), 2);
        assert_eq!(log.entries[0].name, "base.apk");
        assert_eq!(log.entries[0].declared, base.len() as u64);
        assert_eq!(log.entries[0].bytes, base);
        assert_eq!(log.entries[1].name, "config.xxhdpi.apk");
        assert_eq!(log.entries[1].bytes, split);
        assert!(log.entries.iter().all(|e| e.synced));
        assert!(scratch_is_empty(h.scratch.path()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_write_abandons_and_removes_scratch() {
        let bundle = streamed_zip_of(&[("base.apk", &filler(10_000)[..])]);
        let mut installer = FakeInstaller::new(Verdict::Success);
        installer.fail_writes = true;
        let h = harness(installer);
        let src: Arc<dyn PackageSource> =
            Arc::new(MemorySource::new("notes.apks", bundle).without_size_hint());

        h.controller.select_source(src).await.unwrap();
        let state = h.controller.confirm_install().await.unwrap();

        match state {
            InstallState::Error { message } => {
                assert!(message.contains("failed to write base.apk"), "{message}");
                assert!(message.contains("device storage full"), "{message}");
            }
            other => panic!("expected error state, got {other:?}"),
        }
        let log = h.log.lock().unwrap();
        assert!(log.abandoned);
        assert!(!log.committed);
        assert!(scratch_is_empty(h.scratch.path()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bundle_without_packages_is_abandoned_not_committed() {
        let installer = FakeInstaller::new(Verdict::Success);
        let log = Arc::clone(&installer.log);
        let scratch = TempDir::new().unwrap();
        let pipeline = Arc::new(SessionPipeline::new(
            Arc::new(installer),
            PipelineConfig::default().with_scratch_dir(scratch.path()),
        ));
        let bus = Arc::new(InstallEventBus::with_state(InstallState::Parsing, 1, 64));
        let callback: Arc<dyn CommitCallback> =
            Arc::new(CommitStatusReceiver::new(Arc::clone(&bus)));

        let (tx, rx) = channel();
        let forwarder = spawn_forwarder(Arc::clone(&bus), rx);
        let src = MemorySource::new("photos.zip", zip_of(&[("a.jpg", &b"jpeg"[..])]));
        let result =
            tokio::task::spawn_blocking(move || pipeline.run(&src, &tx, callback))
                .await
                .unwrap();
        forwarder.await.unwrap();

        assert!(matches!(
            result,
            Err(Error::Install(InstallError::NoPackageFilesWritten { .. }))
        ));
        let log = log.lock().unwrap();
        assert!(log.abandoned);
        assert!(!log.committed);
        assert!(log.entries.is_empty());
        assert_eq!(
            bus.current(),
            InstallState::error("no valid package files found in photos.zip")
        );
    }

    #[tokio::test]
    async fn update_is_detected_from_installed_packages() {
        let scratch = TempDir::new().unwrap();
        let bundle = zip_of(&[("base.apk", &b"base"[..])]);

        for (installed, expected) in [(vec![PACKAGE_ID.to_string()], true), (vec!["org.other".to_string()], false)] {
            let analyzer = Arc::new(PackageAnalyzer::new(
                Arc::new(FakeParser),
                Arc::new(FakeQuery { installed }),
                scratch.path(),
            ));
            let report = analyzer
                .analyze(source("notes.apks", bundle.clone()))
                .await
                .unwrap();
            assert_eq!(report.is_update, expected);
            assert_eq!(report.meta.package_id, PACKAGE_ID);
            assert_eq!(report.meta.version_name, "Unknown");
            assert_eq!(report.origin, ExtractedFrom::Entry("base.apk".into()));
        }
        assert!(scratch_is_empty(scratch.path()));
    }

    #[tokio::test]
    async fn ready_state_carries_update_flag() {
        let h = harness_with_bus(
            FakeInstaller::new(Verdict::Success),
            &[PACKAGE_ID],
            InstallEventBus::new(1, 64),
        );
        let state = h
            .controller
            .select_source(source("notes.apk", zip_of(&[("base.apk", &b"b"[..])])))
            .await
            .unwrap();
        match state {
            InstallState::ReadyToInstall { meta, is_update } => {
                assert!(is_update);
                assert_eq!(meta.label, "Notes");
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(h.controller.current_package().as_deref(), Some(PACKAGE_ID));
    }

    #[test]
    fn retained_terminal_state_resets_to_idle() {
        for retained in [InstallState::Success, InstallState::error("boom")] {
            let h = harness_with_bus(
                FakeInstaller::new(Verdict::Success),
                &[],
                InstallEventBus::with_state(retained, 1, 8),
            );
            assert_eq!(h.controller.state(), InstallState::Idle);
        }

        let h = harness_with_bus(
            FakeInstaller::new(Verdict::Success),
            &[],
            InstallEventBus::with_state(InstallState::installing(0.4), 1, 8),
        );
        assert_eq!(h.controller.state(), InstallState::installing(0.4));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_attempt_walks_the_state_machine() {
        let bundle = zip_of(&[
            ("base.apk", &filler(200_000)[..]),
            ("config.en.apk", &filler(1_000)[..]),
        ]);
        let h = harness(FakeInstaller::new(Verdict::ConfirmThenSuccess));
        let mut subscription = h.controller.subscribe();

        h.controller
            .select_source(source("notes.apks", bundle))
            .await
            .unwrap();
        h.controller.confirm_install().await.unwrap();

        let states = drain(&mut subscription);
        let mut names: Vec<&str> = states.iter().map(InstallState::name).collect();
        names.dedup();
        assert_eq!(
            names,
            [
                "idle",
                "parsing",
                "ready_to_install",
                "parsing",
                "installing",
                "user_confirmation_required",
                "success"
            ]
        );

        let progress: Vec<f32> = states.iter().filter_map(InstallState::progress).collect();
        assert!(progress.len() <= 102);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.first().copied(), Some(0.0));
        assert_eq!(progress.last().copied(), Some(1.0));

        match &states[states.len() - 2] {
            InstallState::UserConfirmationRequired { pending_action } => {
                assert_eq!(pending_action.session_id(), SessionId(42));
                assert_eq!(pending_action.token(), "confirm-token");
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bare_apk_installs_as_base_apk() {
        let apk = zip_of(&[
            ("AndroidManifest.xml", &b"\x03\x00\x08\x00"[..]),
            ("classes.dex", &b"dex\n035"[..]),
            ("assets/plugin.apk", &b"embedded"[..]),
        ]);
        let h = harness(FakeInstaller::new(Verdict::Success));

        h.controller
            .select_source(source("notes.apk", apk.clone()))
            .await
            .unwrap();
        let state = h.controller.confirm_install().await.unwrap();
        assert_eq!(state, InstallState::Success);

        let log = h.log.lock().unwrap();
        assert_eq!(log.entries.len(), 1);
        assert_eq!(log.entries[0].name, "base.apk");
        assert_eq!(log.entries[0].bytes, apk);
    }

    #[tokio::test]
    async fn unparseable_source_never_reaches_the_installer() {
        let h = harness(FakeInstaller::new(Verdict::Success));
        let state = h
            .controller
            .select_source(source("notes.apk", b"corrupt bytes".to_vec()))
            .await
            .unwrap();

        match &state {
            InstallState::Error { message } => {
                assert!(message.starts_with(PARSE_FAILURE_MESSAGE), "{message}");
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(h.controller.confirm_install().await.unwrap(), state);
        assert_eq!(h.log.lock().unwrap().created, 0);
        assert!(h.controller.current_package().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn installer_rejection_ends_in_error() {
        let h = harness(FakeInstaller::new(Verdict::Fail(FailureKind::Storage)));
        h.controller
            .select_source(source("notes.apks", zip_of(&[("base.apk", &b"b"[..])])))
            .await
            .unwrap();
        let state = h.controller.confirm_install().await.unwrap();
        assert_eq!(state, InstallState::error("not enough storage to install"));
        assert!(!h.log.lock().unwrap().abandoned);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_create_failure_is_published() {
        let mut installer = FakeInstaller::new(Verdict::Success);
        installer.fail_create = true;
        let h = harness(installer);
        h.controller
            .select_source(source("notes.apks", zip_of(&[("base.apk", &b"b"[..])])))
            .await
            .unwrap();
        let state = h.controller.confirm_install().await.unwrap();
        assert_eq!(
            state,
            InstallState::error("failed to create install session: device offline")
        );
        assert!(!h.log.lock().unwrap().abandoned);
    }

    #[tokio::test]
    async fn reset_clears_selection() {
        let h = harness(FakeInstaller::new(Verdict::Success));
        h.controller
            .select_source(source("notes.apks", zip_of(&[("base.apk", &b"b"[..])])))
            .await
            .unwrap();
        assert_eq!(h.controller.reset(), InstallState::Idle);
        assert!(h.controller.current_package().is_none());
        assert_eq!(h.controller.confirm_install().await.unwrap(), InstallState::Idle);
        assert_eq!(h.log.lock().unwrap().created, 0);
    }
}
