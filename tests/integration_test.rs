use docker_squash::docker::squash::{squash, SquashOptions, TagList};
use docker_squash::SquashError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tar::{Archive, Builder, EntryType, Header};

fn test_id(c: char) -> String {
    std::iter::repeat(c).take(64).collect()
}

fn append_file(builder: &mut Builder<&mut Vec<u8>>, name: &str, data: &[u8]) {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(1420070400);
    header.set_cksum();
    builder.append_data(&mut header, name, data).unwrap();
}

fn append_dir(builder: &mut Builder<&mut Vec<u8>>, name: &str) {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_mtime(1420070400);
    header.set_cksum();
    builder.append_data(&mut header, name, std::io::empty()).unwrap();
}

fn inner_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut builder = Builder::new(&mut bytes);
    for (name, data) in files {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1420070400);
        header.set_cksum();
        builder.append_data(&mut header, *name, *data).unwrap();
    }
    builder.finish().unwrap();
    drop(builder);
    bytes
}

fn layer_json(id: &str, parent: &str, cmd: &str) -> Vec<u8> {
    let mut config = json!({
        "id": id,
        "comment": "",
        "created": "2015-01-01T00:00:00Z",
        "container": "",
        "container_config": {"Cmd": ["/bin/sh", "-c", cmd]},
        "docker_version": "1.8.2",
        "architecture": "amd64",
    });
    if !parent.is_empty() {
        config["parent"] = json!(parent);
    }
    serde_json::to_vec(&config).unwrap()
}

struct TestLayer<'a> {
    id: &'a str,
    parent: &'a str,
    cmd: &'a str,
    files: &'a [(&'a str, &'a [u8])],
}

fn image_archive(layers: &[TestLayer], repositories: Option<&str>) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut builder = Builder::new(&mut bytes);
    if let Some(repositories) = repositories {
        append_file(&mut builder, "repositories", repositories.as_bytes());
    }
    for layer in layers {
        append_dir(&mut builder, &format!("{}/", layer.id));
        append_file(&mut builder, &format!("{}/VERSION", layer.id), b"1.0");
        append_file(
            &mut builder,
            &format!("{}/json", layer.id),
            &layer_json(layer.id, layer.parent, layer.cmd),
        );
        append_file(
            &mut builder,
            &format!("{}/layer.tar", layer.id),
            &inner_tar(layer.files),
        );
    }
    builder.finish().unwrap();
    drop(builder);
    bytes
}

fn run_squash(
    archive: Vec<u8>,
    options: &SquashOptions,
) -> Result<(Vec<u8>, String), SquashError> {
    let mut output = Vec::new();
    let mut image_id = Vec::new();
    squash(Cursor::new(archive), &mut output, &mut image_id, options)?;
    Ok((output, String::from_utf8(image_id).unwrap()))
}

fn read_entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = Archive::new(Cursor::new(bytes));
    let mut entries = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        entries.push((name, data));
    }
    entries
}

fn inner_files(layer_tar: &[u8]) -> HashMap<String, Vec<u8>> {
    read_entries(layer_tar).into_iter().collect()
}

/// All `<id>/json` configs of the output, in emission order.
fn layer_configs(entries: &[(String, Vec<u8>)]) -> Vec<(String, Value)> {
    entries
        .iter()
        .filter(|(name, _)| name.ends_with("/json"))
        .map(|(name, data)| {
            let id = name.trim_end_matches("/json").to_string();
            (id, serde_json::from_slice(data).unwrap())
        })
        .collect()
}

fn layer_cmd(config: &Value) -> String {
    config["container_config"]["Cmd"]
        .as_array()
        .map(|cmd| {
            cmd.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

/// The squash layer's id and inner tar, located by its command marker. A
/// re-squashed archive keeps the older, emptied squash layers above the new
/// one, so the last match in emission order is the one carrying content.
fn squash_layer(entries: &[(String, Vec<u8>)]) -> (String, HashMap<String, Vec<u8>>) {
    let (id, _) = layer_configs(entries)
        .into_iter()
        .filter(|(_, config)| layer_cmd(config).contains("#(squash)"))
        .last()
        .expect("no squash layer in output");
    let tar = entries
        .iter()
        .find(|(name, _)| *name == format!("{}/layer.tar", id))
        .map(|(_, data)| inner_files(data))
        .unwrap();
    (id, tar)
}

#[test]
fn test_two_layer_passthrough() {
    let (a, b) = (test_id('a'), test_id('b'));
    let archive = image_archive(
        &[
            TestLayer {
                id: &a,
                parent: "",
                cmd: "#(nop) ADD file:aa in /",
                files: &[("a", b"alpha")],
            },
            TestLayer {
                id: &b,
                parent: &a,
                cmd: "tar -xf /build.tar",
                files: &[("b", b"beta")],
            },
        ],
        None,
    );

    let (output, image_id) = run_squash(archive, &SquashOptions::default()).unwrap();
    assert_eq!(image_id.len(), 64);

    let entries = read_entries(&output);
    let configs = layer_configs(&entries);

    // both filesystem layers collapse into a single squash layer
    assert_eq!(configs.len(), 1);
    let (squash_id, files) = squash_layer(&entries);
    assert_eq!(squash_id, image_id);
    assert_eq!(files["a"], b"alpha");
    assert_eq!(files["b"], b"beta");

    // the squash layer is the new root
    assert!(configs[0].1.get("parent").is_none());
}

#[test]
fn test_whiteout_removes_file() {
    let (a, b) = (test_id('a'), test_id('b'));
    let archive = image_archive(
        &[
            TestLayer {
                id: &a,
                parent: "",
                cmd: "#(nop) ADD file:aa in /",
                files: &[("x/y", b"data"), ("keep", b"k")],
            },
            TestLayer {
                id: &b,
                parent: &a,
                cmd: "rm /x/y",
                files: &[("x/.wh.y", b"")],
            },
        ],
        None,
    );

    let (output, _) = run_squash(archive, &SquashOptions::default()).unwrap();
    let (_, files) = squash_layer(&read_entries(&output));

    assert!(!files.contains_key("x/y"));
    assert!(!files.keys().any(|name| name.starts_with("x/y")));
    assert_eq!(files["keep"], b"k");
}

#[test]
fn test_directory_whiteout_removes_subtree() {
    let (a, b) = (test_id('a'), test_id('b'));
    let archive = image_archive(
        &[
            TestLayer {
                id: &a,
                parent: "",
                cmd: "#(nop) ADD dir:dd in /d",
                files: &[("d/1", b"one"), ("d/2", b"two"), ("other", b"o")],
            },
            TestLayer {
                id: &b,
                parent: &a,
                cmd: "rm -rf /d",
                files: &[(".wh.d", b"")],
            },
        ],
        None,
    );

    let (output, _) = run_squash(archive, &SquashOptions::default()).unwrap();
    let (_, files) = squash_layer(&read_entries(&output));

    assert!(!files.contains_key("d/1"));
    assert!(!files.contains_key("d/2"));
    assert_eq!(files["other"], b"o");
}

#[test]
fn test_metadata_only_layer_preserved() {
    let (a, b) = (test_id('a'), test_id('b'));
    let archive = image_archive(
        &[
            TestLayer {
                id: &a,
                parent: "",
                cmd: "#(nop) ADD file:aa in /",
                files: &[("a", b"alpha")],
            },
            TestLayer {
                id: &b,
                parent: &a,
                cmd: "#(nop) ENV X=1",
                files: &[],
            },
        ],
        None,
    );

    let (output, image_id) = run_squash(archive, &SquashOptions::default()).unwrap();
    let entries = read_entries(&output);
    let configs = layer_configs(&entries);
    assert_eq!(configs.len(), 2);

    let (squash_id, files) = squash_layer(&entries);
    assert_eq!(files["a"], b"alpha");

    // the metadata layer survives with a fresh id, a bumped timestamp and
    // an empty tar
    let (env_id, env_config) = configs
        .iter()
        .find(|(id, _)| *id != squash_id)
        .cloned()
        .unwrap();
    assert_ne!(env_id, b);
    assert_eq!(env_id, image_id);
    assert!(layer_cmd(&env_config).contains("#(nop) ENV X=1"));
    assert_eq!(env_config["parent"].as_str().unwrap(), squash_id);
    assert_ne!(env_config["created"].as_str().unwrap(), "2015-01-01T00:00:00Z");

    let env_tar = entries
        .iter()
        .find(|(name, _)| *name == format!("{}/layer.tar", env_id))
        .map(|(_, data)| data.clone())
        .unwrap();
    assert_eq!(env_tar, vec![0u8; 1024]);
}

#[test]
fn test_multiple_branches_rejected() {
    let (a, b) = (test_id('a'), test_id('b'));
    let repositories = format!(r#"{{"r":{{"t1":"{}","t2":"{}"}}}}"#, a, b);
    let archive = image_archive(
        &[TestLayer {
            id: &a,
            parent: "",
            cmd: "#(nop) ADD file:aa in /",
            files: &[],
        }],
        Some(&repositories),
    );

    assert!(matches!(
        run_squash(archive, &SquashOptions::default()),
        Err(SquashError::MultipleBranches)
    ));
}

#[test]
fn test_repositories_tagging() {
    let a = test_id('a');
    let archive = image_archive(
        &[TestLayer {
            id: &a,
            parent: "",
            cmd: "#(nop) ADD file:aa in /",
            files: &[("a", b"alpha")],
        }],
        None,
    );

    let mut tags = TagList::new();
    tags.insert("r".to_string(), vec!["v1".to_string(), "v2".to_string()]);
    let options = SquashOptions {
        tags,
        ..Default::default()
    };

    let (output, image_id) = run_squash(archive, &options).unwrap();
    let entries = read_entries(&output);

    let (name, data) = entries.last().unwrap();
    assert_eq!(name, "repositories");

    let decoded: Value = serde_json::from_slice(data).unwrap();
    assert_eq!(decoded, json!({"r": {"v1": image_id, "v2": image_id}}));
}

#[test]
fn test_structural_validity() {
    let (a, b, c) = (test_id('a'), test_id('b'), test_id('c'));
    let archive = image_archive(
        &[
            TestLayer {
                id: &a,
                parent: "",
                cmd: "#(nop) ADD file:aa in /",
                files: &[("a", b"alpha")],
            },
            TestLayer {
                id: &b,
                parent: &a,
                cmd: "#(nop) ENV X=1",
                files: &[],
            },
            TestLayer {
                id: &c,
                parent: &b,
                cmd: "#(nop) CMD [\"/bin/sh\"]",
                files: &[],
            },
        ],
        None,
    );

    let (output, _) = run_squash(archive, &SquashOptions::default()).unwrap();
    let entries = read_entries(&output);
    let names: Vec<String> = entries.iter().map(|(name, _)| name.clone()).collect();

    // four entries per layer, in directory, VERSION, json, layer.tar order
    assert_eq!(names.len() % 4, 0);
    for chunk in names.chunks(4) {
        let id = chunk[0].trim_end_matches('/').to_string();
        assert_eq!(chunk[0], format!("{}/", id));
        assert_eq!(chunk[1], format!("{}/VERSION", id));
        assert_eq!(chunk[2], format!("{}/json", id));
        assert_eq!(chunk[3], format!("{}/layer.tar", id));
    }

    // every VERSION carries the literal marker
    for (name, data) in &entries {
        if name.ends_with("/VERSION") {
            assert_eq!(data, b"1.0");
        }
    }
}

#[test]
fn test_surviving_layers_are_squash_or_metadata() {
    let (a, b, c, d) = (test_id('a'), test_id('b'), test_id('c'), test_id('d'));
    let archive = image_archive(
        &[
            TestLayer {
                id: &a,
                parent: "",
                cmd: "#(nop) ADD file:aa in /",
                files: &[("a", b"alpha")],
            },
            TestLayer {
                id: &b,
                parent: &a,
                cmd: "make install",
                files: &[("usr/bin/tool", b"bin")],
            },
            TestLayer {
                id: &c,
                parent: &b,
                cmd: "#(nop) WORKDIR /srv",
                files: &[],
            },
            TestLayer {
                id: &d,
                parent: &c,
                cmd: "#(nop) EXPOSE 80/tcp",
                files: &[],
            },
        ],
        None,
    );

    let (output, _) = run_squash(archive, &SquashOptions::default()).unwrap();
    for (_, config) in layer_configs(&read_entries(&output)) {
        let cmd = layer_cmd(&config);
        let metadata_only = cmd.contains("#(nop)") && !cmd.contains("ADD");
        assert!(
            cmd.contains("#(squash)") || metadata_only,
            "unexpected surviving layer command: {}",
            cmd
        );
    }
}

#[test]
fn test_resquash_is_idempotent() {
    let (a, b) = (test_id('a'), test_id('b'));
    let archive = image_archive(
        &[
            TestLayer {
                id: &a,
                parent: "",
                cmd: "#(nop) ADD file:aa in /",
                files: &[("a", b"alpha"), ("etc/conf", b"v=1")],
            },
            TestLayer {
                id: &b,
                parent: &a,
                cmd: "#(nop) ENV X=1",
                files: &[],
            },
        ],
        None,
    );

    let (first, _) = run_squash(archive, &SquashOptions::default()).unwrap();
    let (_, first_files) = squash_layer(&read_entries(&first));

    // squashing the already squashed archive succeeds and leaves the
    // filesystem contents untouched
    let (second, _) = run_squash(first.clone(), &SquashOptions::default()).unwrap();
    let (_, second_files) = squash_layer(&read_entries(&second));

    assert_eq!(first_files, second_files);
}

#[test]
fn test_config_augmentation_from_leaf() {
    let (a, b) = (test_id('a'), test_id('b'));

    let leaf_json = serde_json::to_vec(&json!({
        "id": b,
        "parent": a,
        "comment": "",
        "created": "2015-01-01T00:00:00Z",
        "container": "",
        "container_config": {
            "Cmd": ["/bin/sh", "-c", "#(nop) ENV PATH=/usr/bin"],
            "Env": ["PATH=/usr/bin"],
            "Entrypoint": ["/entry"],
            "Tty": true
        },
        "config": {
            "Env": ["PATH=/usr/bin"],
            "WorkingDir": "/app",
            "ExposedPorts": {"80/tcp": {}}
        },
        "docker_version": "1.8.2",
        "architecture": "amd64",
    }))
    .unwrap();

    let mut bytes = Vec::new();
    let mut builder = Builder::new(&mut bytes);
    append_dir(&mut builder, &format!("{}/", a));
    append_file(&mut builder, &format!("{}/VERSION", a), b"1.0");
    append_file(
        &mut builder,
        &format!("{}/json", a),
        &layer_json(&a, "", "#(nop) ADD file:aa in /"),
    );
    append_file(
        &mut builder,
        &format!("{}/layer.tar", a),
        &inner_tar(&[("a", b"alpha")]),
    );
    append_dir(&mut builder, &format!("{}/", b));
    append_file(&mut builder, &format!("{}/VERSION", b), b"1.0");
    append_file(&mut builder, &format!("{}/json", b), &leaf_json);
    append_file(&mut builder, &format!("{}/layer.tar", b), &inner_tar(&[]));
    builder.finish().unwrap();
    drop(builder);

    let (output, _) = run_squash(bytes, &SquashOptions::default()).unwrap();
    let entries = read_entries(&output);
    let (squash_id, _) = squash_layer(&entries);
    let (_, config) = layer_configs(&entries)
        .into_iter()
        .find(|(id, _)| *id == squash_id)
        .unwrap();

    let container = &config["container_config"];
    assert_eq!(container["Env"], json!(["PATH=/usr/bin"]));
    assert_eq!(container["Entrypoint"], json!(["/entry"]));
    assert_eq!(container["Tty"], json!(true));
    assert!(layer_cmd(&config).contains("#(squash)"));

    assert_eq!(config["config"]["WorkingDir"], json!("/app"));
    assert_eq!(config["config"]["ExposedPorts"], json!({"80/tcp": {}}));
}

#[test]
fn test_squash_from_id_prefix() {
    let (a, b, c) = (test_id('a'), test_id('b'), test_id('c'));
    let archive = image_archive(
        &[
            TestLayer {
                id: &a,
                parent: "",
                cmd: "#(nop) ADD file:aa in /",
                files: &[("a", b"alpha")],
            },
            TestLayer {
                id: &b,
                parent: &a,
                cmd: "touch /b",
                files: &[("b", b"beta")],
            },
            TestLayer {
                id: &c,
                parent: &b,
                cmd: "touch /c",
                files: &[("c", b"gamma")],
            },
        ],
        None,
    );

    let options = SquashOptions {
        from: b[..12].to_string(),
        ..Default::default()
    };
    let (output, _) = run_squash(archive, &options).unwrap();
    let entries = read_entries(&output);

    // the root stays above the anchor; its content was not squashed
    let configs = layer_configs(&entries);
    assert_eq!(configs.len(), 2);
    assert_eq!(configs[0].0, a);
    let root_tar = entries
        .iter()
        .find(|(name, _)| *name == format!("{}/layer.tar", a))
        .map(|(_, data)| data.clone())
        .unwrap();
    assert_eq!(root_tar, vec![0u8; 1024]);

    let (_, files) = squash_layer(&entries);
    assert!(files.contains_key("b"));
    assert!(files.contains_key("c"));
    assert!(!files.contains_key("a"));
}

#[test]
fn test_invalid_from_rejected() {
    let a = test_id('a');
    let archive = image_archive(
        &[TestLayer {
            id: &a,
            parent: "",
            cmd: "#(nop) ADD file:aa in /",
            files: &[],
        }],
        None,
    );

    let options = SquashOptions {
        from: "ffff".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        run_squash(archive, &options),
        Err(SquashError::InvalidFrom(_))
    ));
}

#[test]
fn test_ambiguous_from_rejected() {
    let a1 = format!("aa{}", &test_id('1')[2..]);
    let a2 = format!("aa{}", &test_id('2')[2..]);
    let archive = image_archive(
        &[
            TestLayer {
                id: &a1,
                parent: "",
                cmd: "#(nop) ADD file:aa in /",
                files: &[],
            },
            TestLayer {
                id: &a2,
                parent: &a1,
                cmd: "touch /x",
                files: &[],
            },
        ],
        None,
    );

    let options = SquashOptions {
        from: "aa".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        run_squash(archive, &options),
        Err(SquashError::AmbiguousId { .. })
    ));
}

#[test]
fn test_empty_archive_has_no_root() {
    let mut bytes = Vec::new();
    let mut builder = Builder::new(&mut bytes);
    builder.finish().unwrap();
    drop(builder);

    assert!(matches!(
        run_squash(bytes, &SquashOptions::default()),
        Err(SquashError::NoRoot)
    ));
}
