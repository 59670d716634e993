fn main() {
    println!("Run `cargo test -p upload-flow-tests` to execute the upload flow tests.");
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use cloudlift_api::types::{self, Container};
    use cloudlift_api::{ApiError, BoxFuture, ContentRange, TaskStatus, Transport};
    use cloudlift_upload::{UploadError, UploadLifecycleManager, UploadOptions};
    use tempfile::TempDir;

    const CATALOG_HREF: &str = "https://vcd.test/api/catalog/c1";
    const TEMPLATE_HREF: &str = "https://vcd.test/api/vAppTemplate/vt1";
    const MEDIA_HREF: &str = "https://vcd.test/api/media/m1";
    const TASK_HREF: &str = "https://vcd.test/api/task/t1";

    /// Transport double driven entirely by scripted responses.
    ///
    /// GET responses queue per href, with the last entry sticky so polling
    /// loops see a stable final state. A POST without a scripted response
    /// (task cancels) returns an empty body.
    #[derive(Default)]
    struct ScriptedTransport {
        gets: Mutex<HashMap<String, VecDeque<String>>>,
        post_responses: Mutex<HashMap<String, VecDeque<String>>>,
        get_log: Mutex<Vec<String>>,
        posts: Mutex<Vec<(String, String)>>,
        puts: Mutex<Vec<(String, String, usize)>>,
        fail_put_at: Option<usize>,
    }

    impl ScriptedTransport {
        fn script_get(&self, href: &str, responses: &[String]) {
            self.gets
                .lock()
                .unwrap()
                .insert(href.into(), responses.iter().cloned().collect());
        }

        fn script_post(&self, href: &str, response: String) {
            self.post_responses
                .lock()
                .unwrap()
                .entry(href.into())
                .or_default()
                .push_back(response);
        }

        fn call_count(&self) -> usize {
            self.get_log.lock().unwrap().len()
                + self.posts.lock().unwrap().len()
                + self.puts.lock().unwrap().len()
        }

        fn put_ranges(&self) -> Vec<(String, String)> {
            self.puts
                .lock()
                .unwrap()
                .iter()
                .map(|(href, range, _)| (href.clone(), range.clone()))
                .collect()
        }

        fn cancel_posts(&self) -> Vec<String> {
            self.posts
                .lock()
                .unwrap()
                .iter()
                .filter(|(href, _)| href.ends_with("/action/cancel"))
                .map(|(href, _)| href.clone())
                .collect()
        }
    }

    fn sticky_pop(map: &mut HashMap<String, VecDeque<String>>, href: &str) -> Option<String> {
        let queue = map.get_mut(href)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    impl Transport for ScriptedTransport {
        fn get(&self, href: &str) -> BoxFuture<'_, Result<String, ApiError>> {
            let href = href.to_string();
            Box::pin(async move {
                self.get_log.lock().unwrap().push(href.clone());
                sticky_pop(&mut self.gets.lock().unwrap(), &href).ok_or(ApiError::Status {
                    status: 404,
                    body: format!("no scripted GET for {href}"),
                })
            })
        }

        fn post(
            &self,
            href: &str,
            _content_type: &str,
            body: String,
        ) -> BoxFuture<'_, Result<String, ApiError>> {
            let href = href.to_string();
            Box::pin(async move {
                self.posts.lock().unwrap().push((href.clone(), body));
                Ok(
                    sticky_pop(&mut self.post_responses.lock().unwrap(), &href)
                        .unwrap_or_default(),
                )
            })
        }

        fn put_piece(
            &self,
            href: &str,
            range: ContentRange,
            data: Vec<u8>,
        ) -> BoxFuture<'_, Result<(), ApiError>> {
            let href = href.to_string();
            Box::pin(async move {
                let mut puts = self.puts.lock().unwrap();
                if self.fail_put_at.is_some_and(|at| puts.len() == at) {
                    return Err(ApiError::Status {
                        status: 502,
                        body: "bad gateway".into(),
                    });
                }
                puts.push((href, range.to_string(), data.len()));
                Ok(())
            })
        }
    }

    fn catalog(existing: &[&str]) -> Container {
        let items: String = existing
            .iter()
            .map(|name| format!(r#"<Item href="https://vcd.test/api/catalogItem/{name}" name="{name}"/>"#))
            .collect();
        let xml =
            format!(r#"<Catalog href="{CATALOG_HREF}" name="main"><Items>{items}</Items></Catalog>"#);
        types::parse(&xml).unwrap()
    }

    fn manager(transport: &Arc<ScriptedTransport>) -> UploadLifecycleManager {
        UploadLifecycleManager::new(Arc::clone(transport) as Arc<dyn Transport>)
            .with_poll_interval(Duration::from_millis(1))
            .with_link_deadline(Duration::from_millis(200))
    }

    fn write_iso(dir: &TempDir, name: &str, len: usize) -> PathBuf {
        let mut data = vec![0u8; len];
        data[32769..32774].copy_from_slice(b"CD001");
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn descriptor_xml(files: &[(&str, u64)]) -> String {
        let refs: String = files
            .iter()
            .map(|(href, size)| {
                format!(r#"<File ovf:href="{href}" ovf:id="file-{href}" ovf:size="{size}"/>"#)
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ovf:Envelope xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1">
  <ovf:References>{refs}</ovf:References>
</ovf:Envelope>"#
        )
    }

    /// Entity as returned right after creation: only the descriptor slot has
    /// an upload link, no import task yet.
    fn template_phase1(descriptor_size: u64) -> String {
        format!(
            r#"<VAppTemplate href="{TEMPLATE_HREF}" id="urn:template:vt1" name="tmpl">
                <Files>
                    <File name="vm.ovf" size="{descriptor_size}" bytesTransferred="0">
                        <Link rel="upload:default" href="https://vcd.test/transfer/vm.ovf"/>
                    </File>
                </Files>
            </VAppTemplate>"#
        )
    }

    /// Entity once the server has parsed the descriptor: one link per disk
    /// plus the import task.
    fn template_phase2(descriptor_size: u64, disks: &[(&str, u64)]) -> String {
        let disk_files: String = disks
            .iter()
            .map(|(name, size)| {
                format!(
                    r#"<File name="{name}" size="{size}" bytesTransferred="0">
                        <Link rel="upload:default" href="https://vcd.test/transfer/{name}"/>
                    </File>"#
                )
            })
            .collect();
        format!(
            r#"<VAppTemplate href="{TEMPLATE_HREF}" id="urn:template:vt1" name="tmpl">
                <Files>
                    <File name="vm.ovf" size="{descriptor_size}" bytesTransferred="{descriptor_size}">
                        <Link rel="upload:default" href="https://vcd.test/transfer/vm.ovf"/>
                    </File>
                    {disk_files}
                </Files>
                <Tasks>
                    <Task href="{TASK_HREF}" id="urn:task:t1" status="queued">
                        <Owner href="{TEMPLATE_HREF}" id="urn:template:vt1" name="tmpl"/>
                    </Task>
                </Tasks>
            </VAppTemplate>"#
        )
    }

    fn media_entity(size: u64) -> String {
        format!(
            r#"<Media href="{MEDIA_HREF}" id="urn:media:m1" name="boot.iso">
                <Files>
                    <File name="boot.iso" size="{size}" bytesTransferred="0">
                        <Link rel="upload:default" href="https://vcd.test/transfer/boot.iso"/>
                    </File>
                </Files>
                <Tasks>
                    <Task href="{TASK_HREF}" id="urn:task:t1" status="running">
                        <Owner href="{MEDIA_HREF}" id="urn:media:m1" name="boot.iso"/>
                    </Task>
                </Tasks>
            </Media>"#
        )
    }

    fn task_xml(status: &str) -> String {
        format!(r#"<Task href="{TASK_HREF}" id="urn:task:t1" status="{status}"/>"#)
    }

    #[tokio::test]
    async fn media_upload_end_to_end() {
        let dir = TempDir::new().unwrap();
        let iso = write_iso(&dir, "boot.iso", 40_000);

        let transport = Arc::new(ScriptedTransport::default());
        transport.script_post(CATALOG_HREF, media_entity(40_000));
        transport.script_get(MEDIA_HREF, &[media_entity(40_000)]);
        transport.script_get(TASK_HREF, &[task_xml("running"), task_xml("success")]);

        let handle = manager(&transport)
            .upload_media(&catalog(&[]), "boot.iso", &iso, UploadOptions::default())
            .await
            .unwrap();

        let mut task = handle.join().await.unwrap();
        task.wait_completion(Duration::from_millis(1), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(task.status(), TaskStatus::Success);

        // One PUT covering the entire image.
        assert_eq!(
            transport.put_ranges(),
            vec![(
                "https://vcd.test/transfer/boot.iso".to_string(),
                "bytes 0-39999/40000".to_string()
            )]
        );
        assert!(transport.cancel_posts().is_empty());
    }

    #[tokio::test]
    async fn package_upload_sends_descriptor_then_pieced_disk() {
        let dir = TempDir::new().unwrap();
        let ovf = descriptor_xml(&[("disk1.vmdk", 5 * 1024 * 1024)]);
        std::fs::write(dir.path().join("vm.ovf"), &ovf).unwrap();
        std::fs::write(dir.path().join("disk1.vmdk"), vec![0xAB; 5 * 1024 * 1024]).unwrap();
        let ovf_len = ovf.len() as u64;

        let transport = Arc::new(ScriptedTransport::default());
        transport.script_post(CATALOG_HREF, template_phase1(ovf_len));
        transport.script_get(
            TEMPLATE_HREF,
            &[
                template_phase1(ovf_len),
                template_phase2(ovf_len, &[("disk1.vmdk", 5 * 1024 * 1024)]),
            ],
        );

        let options = UploadOptions {
            piece_size: 2 * 1024 * 1024,
            ..Default::default()
        };
        let handle = manager(&transport)
            .upload_package(&catalog(&["other"]), "tmpl", dir.path(), options)
            .await
            .unwrap();
        let task = handle.join().await.unwrap();
        assert_eq!(task.body().id, "urn:task:t1");

        let expected_descriptor_range = format!("bytes 0-{}/{ovf_len}", ovf_len - 1);
        assert_eq!(
            transport.put_ranges(),
            vec![
                (
                    "https://vcd.test/transfer/vm.ovf".to_string(),
                    expected_descriptor_range
                ),
                (
                    "https://vcd.test/transfer/disk1.vmdk".to_string(),
                    "bytes 0-2097151/5242880".to_string()
                ),
                (
                    "https://vcd.test/transfer/disk1.vmdk".to_string(),
                    "bytes 2097152-4194303/5242880".to_string()
                ),
                (
                    "https://vcd.test/transfer/disk1.vmdk".to_string(),
                    "bytes 4194304-5242879/5242880".to_string()
                ),
            ]
        );
        assert!(transport.cancel_posts().is_empty());
    }

    #[tokio::test]
    async fn name_collision_fails_before_any_network_call() {
        let dir = TempDir::new().unwrap();

        let transport = Arc::new(ScriptedTransport::default());
        let err = manager(&transport)
            .upload_package(
                &catalog(&["tmpl"]),
                "tmpl",
                dir.path(),
                UploadOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::NameCollision(name) if name == "tmpl"));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn disk_failure_cancels_import_task_once() {
        let dir = TempDir::new().unwrap();
        let ovf = descriptor_xml(&[("a.vmdk", 4), ("b.vmdk", 4)]);
        std::fs::write(dir.path().join("vm.ovf"), &ovf).unwrap();
        std::fs::write(dir.path().join("a.vmdk"), vec![1u8; 4]).unwrap();
        std::fs::write(dir.path().join("b.vmdk"), vec![2u8; 4]).unwrap();
        let ovf_len = ovf.len() as u64;

        // PUT order: descriptor, a.vmdk, b.vmdk. The third PUT fails.
        let transport = Arc::new(ScriptedTransport {
            fail_put_at: Some(2),
            ..Default::default()
        });
        transport.script_post(CATALOG_HREF, template_phase1(ovf_len));
        transport.script_get(
            TEMPLATE_HREF,
            &[
                template_phase1(ovf_len),
                template_phase2(ovf_len, &[("a.vmdk", 4), ("b.vmdk", 4)]),
            ],
        );

        let handle = manager(&transport)
            .upload_package(
                &catalog(&[]),
                "tmpl",
                dir.path(),
                UploadOptions::default(),
            )
            .await
            .unwrap();

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, UploadError::Transfer(_)));

        // a.vmdk went out; b.vmdk's failed PUT was not retried.
        assert_eq!(transport.puts.lock().unwrap().len(), 2);
        // Exactly one cancel for the single import task.
        assert_eq!(
            transport.cancel_posts(),
            vec![format!("{TASK_HREF}/action/cancel")]
        );
    }
}
