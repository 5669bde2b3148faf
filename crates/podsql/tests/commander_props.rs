//! Argument translation properties shared by every engine

use chrono::{TimeZone, Utc};
use podsql::commander::{PgEnvironment, PostgresCommander};
use podsql::prelude::*;
use std::collections::HashSet;
use std::io::Write;

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn parse(engine: Engine, args: &[&str]) -> Box<dyn DbCommander> {
    engine.parse_args(&strings(args)).unwrap()
}

fn no_env() -> PgEnvironment {
    PgEnvironment::default()
}

#[test]
fn joined_and_separated_forms_agree() {
    let cases: &[(Engine, &[&str], &[&str])] = &[
        (
            Engine::MySql,
            &["-h", "db", "-P", "3307", "-u", "app", "-D", "shop", "--", "extra"],
            &["--host=db", "--port=3307", "-uapp", "-Dshop", "--", "extra"],
        ),
        (
            Engine::SqlCmd,
            &["-S", "db,1434", "-U", "sa", "-d", "shop", "--", "extra"],
            &["-Sdb,1434", "-Usa", "-dshop", "--", "extra"],
        ),
        (
            Engine::Postgres,
            &["-h", "db", "-p", "5433", "-U", "app", "--", "shop"],
            &["--host=db", "--port=5433", "--username=app", "--", "shop"],
        ),
    ];

    for (engine, separated, joined) in cases {
        let separated = parse(*engine, separated);
        let joined = parse(*engine, joined);
        assert_eq!(separated.connect_info(), joined.connect_info(), "{}", engine);
        assert_eq!(
            separated.interactive_command(),
            joined.interactive_command(),
            "{}",
            engine
        );
    }

    let psql = parse(Engine::Postgres, &["--host=db", "--", "shop"]);
    assert_eq!(psql.connect_info().db_name.as_deref(), Some("shop"));
}

#[test]
fn arguments_after_double_dash_are_positional() {
    let args = strings(&["-h", "db", "--", "-weird-db"]);
    let c = PostgresCommander::parse_with_env(&args, &no_env()).unwrap();
    assert_eq!(c.connect_info().db_name.as_deref(), Some("-weird-db"));
    assert_eq!(c.connect_info().server.as_deref(), Some("db"));
}

#[test]
fn interactive_only_without_query_script_or_help() {
    let interactive: &[(Engine, &[&str])] = &[
        (Engine::MySql, &["-h", "db"]),
        (Engine::SqlCmd, &["-S", "db"]),
        (Engine::Postgres, &["-h", "db"]),
    ];
    for (engine, args) in interactive {
        assert!(parse(*engine, args).is_interactive(), "{}", engine);
    }

    let batch: &[(Engine, &[&str])] = &[
        (Engine::MySql, &["-h", "db", "-e", "SELECT 1"]),
        (Engine::MySql, &["--help"]),
        (Engine::SqlCmd, &["-S", "db", "-Q", "SELECT 1"]),
        (Engine::SqlCmd, &["-?"]),
        (Engine::Postgres, &["-h", "db", "-c", "SELECT 1"]),
        (Engine::Postgres, &["--help"]),
    ];
    for (engine, args) in batch {
        assert!(!parse(*engine, args).is_interactive(), "{} {:?}", engine, args);
    }
}

#[test]
fn default_arguments_show_help() {
    for engine in Engine::ALL {
        let c = engine.parse_args(&engine.default_args()).unwrap();
        assert!(!c.is_interactive(), "{}", engine);
        assert_eq!(c.command(), c.help_command(), "{}", engine);
    }
}

#[test]
fn script_files_concatenate_in_order_without_comments() {
    let mut first = tempfile::NamedTempFile::new().unwrap();
    writeln!(first, "-- setup").unwrap();
    writeln!(first, "CREATE TABLE t (id int);").unwrap();
    let mut second = tempfile::NamedTempFile::new().unwrap();
    writeln!(second, "  -- seed rows").unwrap();
    writeln!(second, "INSERT INTO t VALUES (1);").unwrap();

    let args = vec![
        "-f".to_string(),
        first.path().display().to_string(),
        format!("--file={}", second.path().display()),
        "-c".to_string(),
        "SELECT * FROM t;".to_string(),
    ];
    let c = PostgresCommander::parse_with_env(&args, &no_env()).unwrap();

    let query = c.query();
    assert!(!query.contains("--"));
    let create = query.find("CREATE TABLE").unwrap();
    let insert = query.find("INSERT INTO").unwrap();
    let select = query.find("SELECT *").unwrap();
    assert!(create < insert && insert < select);
}

#[test]
fn flags_beat_environment_beats_password_file() {
    let mut passfile = tempfile::NamedTempFile::new().unwrap();
    writeln!(passfile, "*:*:*:*:filepass").unwrap();

    let env = PgEnvironment {
        host: Some("envhost".to_string()),
        port: Some("6543".to_string()),
        database: Some("envdb".to_string()),
        user: Some("envuser".to_string()),
        passfile: Some(passfile.path().to_path_buf()),
    };

    let args = strings(&["-h", "flaghost", "-U", "flaguser"]);
    let c = PostgresCommander::parse_with_env(&args, &env).unwrap();
    let info = c.connect_info();
    assert_eq!(info.server.as_deref(), Some("flaghost"));
    assert_eq!(info.user.as_deref(), Some("flaguser"));
    assert_eq!(info.db_name.as_deref(), Some("envdb"));
    assert_eq!(info.port, "6543");
    assert_eq!(info.password.as_deref(), Some("filepass"));
}

#[test]
fn first_matching_password_record_wins() {
    let mut passfile = tempfile::NamedTempFile::new().unwrap();
    writeln!(passfile, "# comment").unwrap();
    writeln!(passfile, "other:5432:*:app:wrong").unwrap();
    writeln!(passfile, "db:5432:*:app:right").unwrap();
    writeln!(passfile, "*:*:*:*:fallback").unwrap();

    let env = PgEnvironment {
        passfile: Some(passfile.path().to_path_buf()),
        ..Default::default()
    };
    let args = strings(&["-h", "db", "-U", "app"]);
    let c = PostgresCommander::parse_with_env(&args, &env).unwrap();
    assert_eq!(c.connect_info().password.as_deref(), Some("right"));
}

#[test]
fn names_in_the_same_second_differ() {
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 15, 4, 5).unwrap();
    let names: HashSet<String> = (0..50)
        .map(|_| WorkloadName::generate("mysql", chrono_tz::UTC, "alice", now).to_string())
        .collect();
    assert_eq!(names.len(), 50);
    assert!(names.iter().all(|n| n.starts_with("podsql-mysql-20240102-150405-alice-")));
}
