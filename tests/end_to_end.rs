//! End-to-end scenarios from spec.md §8, each against an in-process
//! `wiremock` server standing in for a pre-signed GCS/S3 URL.

use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use blobfetch::checksum::Algorithm;
use blobfetch::http::Client;
use blobfetch::orchestrator::manifest::ManifestEntry;
use blobfetch::orchestrator::{self, GivenChecksum};

fn range_responder(data: Vec<u8>) -> impl Fn(&Request) -> ResponseTemplate {
    move |req: &Request| {
        if let Some(range) = req.headers.get("range") {
            let range = range.to_str().unwrap().trim_start_matches("bytes=");
            let (start, end) = range.split_once('-').unwrap();
            let (start, end): (usize, usize) = (start.parse().unwrap(), end.parse().unwrap());
            ResponseTemplate::new(206).set_body_bytes(data[start..=end].to_vec())
        } else {
            ResponseTemplate::new(200)
                .insert_header("content-length", data.len().to_string())
                .set_body_bytes(data.clone())
        }
    }
}

#[test]
fn scenario_1_oneshot_small_file() {
    smol::block_on(async {
        let server = MockServer::start().await;
        let data = b"xyz".to_vec();
        let digest = format!("{:x}", md5::compute(&data));
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-length", "3")
                    .insert_header("content-md5", digest)
                    .set_body_bytes(data.clone()),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("xyz.bin");
        let client = Arc::new(Client::new());
        let url = format!("{}/obj", server.uri());

        orchestrator::oneshot(client, &url, &target, None, None)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), data);
    });
}

#[test]
fn scenario_2_multipart_large_file() {
    smol::block_on(async {
        let server = MockServer::start().await;
        let data: Vec<u8> = (0..999_983u32).map(|i| (i % 251) as u8).collect();
        let digest = format!("{:x}", md5::compute(&data));
        let body = data.clone();
        let body_digest = digest.clone();
        Mock::given(method("GET"))
            .respond_with(move |req: &Request| {
                if let Some(range) = req.headers.get("range") {
                    let range = range.to_str().unwrap().trim_start_matches("bytes=");
                    let (start, end) = range.split_once('-').unwrap();
                    let (start, end): (usize, usize) = (start.parse().unwrap(), end.parse().unwrap());
                    ResponseTemplate::new(206).set_body_bytes(body[start..=end].to_vec())
                } else {
                    ResponseTemplate::new(200)
                        .insert_header("content-length", body.len().to_string())
                        .insert_header("content-md5", body_digest.clone())
                        .set_body_bytes(body.clone())
                }
            })
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("large.bin");
        let client = Arc::new(Client::new());
        let url = format!("{}/obj", server.uri());

        orchestrator::multipart(client, &url, &target, 1021, 4, None, None)
            .await
            .unwrap();
        let got = std::fs::read(&target).unwrap();
        assert_eq!(got.len(), data.len());
        assert_eq!(got, data);
        assert_eq!(format!("{:x}", md5::compute(&got)), digest);
    });
}

#[test]
fn scenario_3_s3_etag_multipart() {
    use blobfetch::checksum::{s3_multipart_layouts, S3MultiEtag};

    let size = 54_743_580u64;
    let number_of_parts = 4u32;
    let layouts = s3_multipart_layouts(size, number_of_parts).unwrap();
    assert_eq!(layouts, vec![14_680_064u64, 15_728_640, 16_777_216, 17_825_792]);

    let part_size = layouts[2]; // 16_777_216, matching spec.md's example
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();

    let mut part_digests = Vec::new();
    for chunk in data.chunks(part_size as usize) {
        part_digests.push(md5::compute(chunk).0);
    }
    let mut concatenated = Vec::new();
    for d in &part_digests {
        concatenated.extend_from_slice(d);
    }
    let expected = format!("{:x}-{}", md5::compute(&concatenated), part_digests.len());

    let mut verifier = S3MultiEtag::new(size, number_of_parts).unwrap();
    for chunk in data.chunks(65536) {
        verifier.update(chunk);
    }
    assert!(verifier.matches(&expected));
}

#[test]
fn scenario_4_gs_crc32c() {
    use blobfetch::checksum::GsCrc32c;

    let data: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
    let expected = base64::encode(crc32c::crc32c(&data).to_be_bytes());

    let mut verifier = GsCrc32c::new();
    for chunk in data.chunks(128) {
        verifier.update(chunk);
    }
    assert!(verifier.matches(&expected));
}

#[test]
fn scenario_5_range_reader_no_overlap() {
    use blobfetch::reader::parallel::ParallelReader;

    smol::block_on(async {
        let server = MockServer::start().await;
        let data: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        Mock::given(method("GET"))
            .respond_with(range_responder(data.clone()))
            .mount(&server)
            .await;

        let client = Arc::new(Client::new());
        let url = format!("{}/obj", server.uri());
        let mut reader = ParallelReader::open(client, url, 8, 2).await.unwrap();

        let held = reader.read(1).await.unwrap();
        assert_eq!(held[0], data[0]);

        let mut drained = 0u64;
        while drained < reader.max_read() as u64 {
            let view = reader.read(reader.max_read() as u64).await.unwrap();
            if view.is_empty() {
                view.mark_released();
                break;
            }
            drained += view.len() as u64;
            view.mark_released();
        }

        assert_eq!(held[0], data[0]);
        held.mark_released();
        reader.close().await;
    });
}

#[test]
fn scenario_6_inaccessible_url_continues_after_error() {
    smol::block_on(async {
        let server = MockServer::start().await;

        let ok_a = b"first file contents".to_vec();
        let ok_b = b"third file contents, a bit longer".to_vec();

        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", ok_a.len().to_string()).set_body_bytes(ok_a.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", ok_b.len().to_string()).set_body_bytes(ok_b.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manifest = vec![
            ManifestEntry {
                url: format!("{}/a", server.uri()),
                filepath: Some(dir.path().join("a.bin").to_str().unwrap().to_string()),
                checksum: None,
                checksum_algorithm: None,
            },
            ManifestEntry {
                url: format!("{}/b", server.uri()),
                filepath: Some(dir.path().join("b.bin").to_str().unwrap().to_string()),
                checksum: None,
                checksum_algorithm: None,
            },
            ManifestEntry {
                url: format!("{}/c", server.uri()),
                filepath: Some(dir.path().join("c.bin").to_str().unwrap().to_string()),
                checksum: None,
                checksum_algorithm: None,
            },
        ];

        let outcome = orchestrator::download(&manifest, 1, 1024, true).await.unwrap();
        assert_ne!(outcome.exit_code(), 0);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].0.ends_with("/b"));

        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), ok_a);
        assert_eq!(std::fs::read(dir.path().join("c.bin")).unwrap(), ok_b);
        assert!(!dir.path().join("b.bin").exists());
    });
}

#[test]
fn checksum_algorithm_given_explicitly_overrides_header_inference() {
    smol::block_on(async {
        let server = MockServer::start().await;
        let data = b"checked via caller-supplied checksum".to_vec();
        let digest = format!("{:x}", md5::compute(&data));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", data.len().to_string()).set_body_bytes(data.clone()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        let client = Arc::new(Client::new());
        let url = format!("{}/obj", server.uri());

        orchestrator::oneshot(
            client,
            &url,
            &target,
            Some(GivenChecksum { value: digest, algorithm: Algorithm::Md5 }),
            None,
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), data);
    });
}

#[test]
fn inaccessible_entry_aborts_the_whole_batch_without_continue_after_error() {
    smol::block_on(async {
        let server = MockServer::start().await;

        let ok_a = b"first file contents".to_vec();

        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-length", ok_a.len().to_string()).set_body_bytes(ok_a.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let manifest = vec![
            ManifestEntry {
                url: format!("{}/a", server.uri()),
                filepath: Some(dir.path().join("a.bin").to_str().unwrap().to_string()),
                checksum: None,
                checksum_algorithm: None,
            },
            ManifestEntry {
                url: format!("{}/b", server.uri()),
                filepath: Some(dir.path().join("b.bin").to_str().unwrap().to_string()),
                checksum: None,
                checksum_algorithm: None,
            },
        ];

        let result = orchestrator::download(&manifest, 1, 1024, false).await;
        assert!(matches!(result, Err(blobfetch::Error::Inaccessible { status: 403, .. })));
        assert!(!dir.path().join("a.bin").exists());
        assert!(!dir.path().join("b.bin").exists());
    });
}
