use super::*;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.site.content_dir, PathBuf::from("wp-content"));
    assert_eq!(settings.site.site_base(), "http://localhost:8080");
    assert_eq!(settings.site.content_url_path, "/wp-content");
    assert!(settings.site.origin_url.is_none());
    assert_eq!(settings.cache.min_capture_bytes, 255);
    assert_eq!(settings.cache.preload_paths, vec!["/".to_string()]);
    assert_eq!(settings.license.revalidate_interval, Duration::from_secs(86_400));
    assert!(settings.admin.token.is_none());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        origin_url: Some("http://127.0.0.1:9000".to_string()),
        ..Default::default()
    };
    let site = SiteOverrides {
        log_level: Some("debug".to_string()),
        content_dir: Some(PathBuf::from("/srv/site/wp-content")),
        ..Default::default()
    };

    raw.apply_site_overrides(&site);
    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(
        settings.site.origin_url.as_ref().map(Url::as_str),
        Some("http://127.0.0.1:9000/")
    );
    assert_eq!(settings.site.content_dir, PathBuf::from("/srv/site/wp-content"));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_site_overrides(&SiteOverrides {
        log_json: Some(true),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn rejects_invalid_values() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "server.port", .. })
    ));

    let mut raw = RawSettings::default();
    raw.site.origin_url = Some("ftp://example.com".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "site.origin_url", .. })
    ));

    let mut raw = RawSettings::default();
    raw.admin.token = Some("short".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "admin.token", .. })
    ));

    let mut raw = RawSettings::default();
    raw.site.content_url_path = Some("wp-content".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "site.content_url_path", .. })
    ));
}

#[test]
fn blank_lists_and_tokens_collapse() {
    let mut raw = RawSettings::default();
    raw.admin.token = Some("   ".to_string());
    raw.cache.session_cookies = Some(vec![" ".to_string(), " edd_items_in_cart ".to_string()]);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(settings.admin.token.is_none());
    assert_eq!(settings.cache.session_cookies, vec!["edd_items_in_cart".to_string()]);
}

#[test]
fn admin_paths_match_by_prefix() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert!(settings.site.is_admin_path("/wp-admin/options.php"));
    assert!(settings.site.is_admin_path("/wp-login.php"));
    assert!(!settings.site.is_admin_path("/blog/wp-admin-tips"));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["speed-optimizer"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_cache_preload_arguments() {
    let args = CliArgs::parse_from([
        "speed-optimizer",
        "cache",
        "preload",
        "/",
        "/about",
        "--content-dir",
        "/srv/wp-content",
    ]);

    assert_eq!(
        args.site.content_dir.as_deref(),
        Some(std::path::Path::new("/srv/wp-content"))
    );
    match args.command.expect("cache command") {
        Command::Cache(CacheArgs {
            command: CacheCommand::Preload(preload),
        }) => assert_eq!(preload.paths, vec!["/".to_string(), "/about".to_string()]),
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_license_and_settings_arguments() {
    let args = CliArgs::parse_from(["speed-optimizer", "license", "activate", "ABCD-1234-EFGH-5678"]);
    match args.command.expect("license command") {
        Command::License(LicenseArgs {
            command: LicenseCommand::Activate(activate),
        }) => assert_eq!(activate.key, "ABCD-1234-EFGH-5678"),
        _ => panic!("wrong command parsed"),
    }

    let args = CliArgs::parse_from(["speed-optimizer", "settings", "export", "/tmp/settings.json"]);
    match args.command.expect("settings command") {
        Command::Settings(SettingsArgs {
            command: SettingsCommand::Export(export),
        }) => assert_eq!(export.file, std::path::Path::new("/tmp/settings.json")),
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "speed-optimizer",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--origin-url",
        "http://127.0.0.1:9000",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.origin_url.as_deref(),
                Some("http://127.0.0.1:9000")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
#[serial_test::serial]
fn file_then_environment_then_cli() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("speed-optimizer.toml");
    std::fs::write(
        &file,
        "[server]\nport = 4100\n\n[site]\norigin_url = \"http://127.0.0.1:9000\"\n",
    )
    .expect("write config file");
    let file = file.to_string_lossy().into_owned();

    // SAFETY: serialised with every other test touching the environment.
    unsafe {
        std::env::set_var("SPEED_OPTIMIZER__SERVER__PORT", "4200");
        std::env::set_var("SPEED_OPTIMIZER__CACHE__PRELOAD_PATHS", "/,/shop");
    }

    let from_env = load(&CliArgs::parse_from([
        "speed-optimizer",
        "--config-file",
        file.as_str(),
    ]));
    let from_cli = load(&CliArgs::parse_from([
        "speed-optimizer",
        "--config-file",
        file.as_str(),
        "serve",
        "--server-port",
        "4300",
    ]));

    unsafe {
        std::env::remove_var("SPEED_OPTIMIZER__SERVER__PORT");
        std::env::remove_var("SPEED_OPTIMIZER__CACHE__PRELOAD_PATHS");
    }

    let from_env = from_env.expect("valid settings");
    assert_eq!(from_env.server.addr.port(), 4200);
    assert_eq!(
        from_env.site.origin_url.as_ref().map(Url::as_str),
        Some("http://127.0.0.1:9000/")
    );
    assert_eq!(
        from_env.cache.preload_paths,
        vec!["/".to_string(), "/shop".to_string()]
    );

    assert_eq!(from_cli.expect("valid settings").server.addr.port(), 4300);
}

#[test]
#[serial_test::serial]
fn environment_lists_split_on_commas() {
    // SAFETY: serialised with every other test touching the environment.
    unsafe {
        std::env::set_var("SPEED_OPTIMIZER__SITE__ADMIN_PATH_PREFIXES", "/wp-admin,/login");
        std::env::set_var(
            "SPEED_OPTIMIZER__CACHE__LOGGED_IN_COOKIES",
            "wordpress_logged_in_,member_",
        );
        std::env::set_var("SPEED_OPTIMIZER__CACHE__SESSION_COOKIES", "cart_hash");
    }

    let settings = load(&CliArgs::parse_from(["speed-optimizer"]));

    unsafe {
        std::env::remove_var("SPEED_OPTIMIZER__SITE__ADMIN_PATH_PREFIXES");
        std::env::remove_var("SPEED_OPTIMIZER__CACHE__LOGGED_IN_COOKIES");
        std::env::remove_var("SPEED_OPTIMIZER__CACHE__SESSION_COOKIES");
    }

    let settings = settings.expect("valid settings");
    assert_eq!(
        settings.site.admin_path_prefixes,
        vec!["/wp-admin".to_string(), "/login".to_string()]
    );
    assert_eq!(
        settings.cache.logged_in_cookies,
        vec!["wordpress_logged_in_".to_string(), "member_".to_string()]
    );
    assert_eq!(settings.cache.session_cookies, vec!["cart_hash".to_string()]);
}
