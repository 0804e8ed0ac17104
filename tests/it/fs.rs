use std::io;

use stdmock::io::fs::{self, *};
use stdmock::io::{CloserMock, ReaderMock};
use unimock::*;

fn open_self(u: &Unimock, _: &str) -> io::Result<Box<dyn File>> {
    Ok(Box::new(u.clone()) as Box<dyn File>)
}

fn entry(name: &'static str) -> Box<dyn DirEntry> {
    Box::new(Unimock::new(
        DirEntryMock::name
            .each_call(matching!())
            .returns(name.to_string()),
    )) as Box<dyn DirEntry>
}

#[test]
fn read_file_through_mocked_open() {
    let u = Unimock::new((
        FsMock::open
            .next_call(matching!("config.json"))
            .answers(&open_self),
        ReaderMock::read
            .next_call(matching!(_))
            .answers(&|_, buf| {
                buf[..2].copy_from_slice(b"{}");
                Ok(2)
            }),
        ReaderMock::read.next_call(matching!(_)).returns(Ok(0)),
        CloserMock::close.next_call(matching!()).returns(Ok(())),
    ));

    assert_eq!(b"{}".to_vec(), fs::read_file(&u, "config.json").unwrap());
}

#[test]
fn open_missing_file() {
    let u = Unimock::new(
        FsMock::open
            .next_call(matching!("missing"))
            .answers(&|_, _| Err(io::Error::from(io::ErrorKind::NotFound))),
    );

    let err = fs::read_file(&u, "missing").unwrap_err();
    assert_eq!(io::ErrorKind::NotFound, err.kind());
}

#[test]
fn read_error_still_closes() {
    let u = Unimock::new((
        FsMock::open.next_call(matching!(_)).answers(&open_self),
        ReaderMock::read
            .next_call(matching!(_))
            .answers(&|_, _| Err(io::Error::other("disk error"))),
        CloserMock::close.next_call(matching!()).returns(Ok(())),
    ));

    assert_eq!("disk error", fs::read_file(&u, "f").unwrap_err().to_string());
}

#[test]
fn stat_through_open_file() {
    let u = Unimock::new((
        FsMock::open.next_call(matching!("data.bin")).answers(&open_self),
        FileMock::stat.next_call(matching!()).answers(&|_| {
            Ok(Box::new(Unimock::new((
                FileInfoMock::name
                    .next_call(matching!())
                    .returns("data.bin".to_string()),
                FileInfoMock::size.next_call(matching!()).returns(1024u64),
                FileInfoMock::is_dir.next_call(matching!()).returns(false),
            ))) as Box<dyn FileInfo>)
        }),
        CloserMock::close.next_call(matching!()).returns(Ok(())),
    ));

    let info = fs::stat(&u, "data.bin").unwrap();
    assert_eq!("data.bin", info.name());
    assert_eq!(1024, info.size());
    assert!(!info.is_dir());
}

#[test]
fn file_mode_mock() {
    let mode = Unimock::new((
        FileModeMock::is_dir.next_call(matching!()).returns(true),
        FileModeMock::perm.next_call(matching!()).returns(0o755u32),
        unimock::mock::core::fmt::DisplayMock::fmt
            .next_call(matching!(_))
            .answers(&|_, f| write!(f, "drwxr-xr-x")),
    ));

    assert!(FileMode::is_dir(&mode));
    assert_eq!(0o755, mode.perm());
    assert_eq!("drwxr-xr-x", mode.to_string());
}

#[test]
fn glob_over_mocked_listing() {
    let u = Unimock::new(
        ReadDirFsMock::read_dir
            .next_call(matching!("."))
            .answers(&|_, _| Ok(vec![entry("a.txt"), entry("b.md"), entry("c.txt")])),
    );

    assert_eq!(
        vec!["a.txt".to_string(), "c.txt".to_string()],
        fs::glob(&u, "*.txt").unwrap()
    );
}

#[test]
fn glob_literal_pattern_uses_stat() {
    let u = Unimock::new((
        StatFsMock::stat
            .next_call(matching!("exists"))
            .answers(&|_, _| Ok(Box::new(Unimock::new(())) as Box<dyn FileInfo>)),
        StatFsMock::stat
            .next_call(matching!("gone"))
            .answers(&|_, _| Err(io::Error::from(io::ErrorKind::NotFound))),
    ));

    assert_eq!(vec!["exists".to_string()], fs::glob(&u, "exists").unwrap());
    assert!(fs::glob(&u, "gone").unwrap().is_empty());
}

#[test]
fn glob_skips_unreadable_directories() {
    let u = Unimock::new(
        ReadDirFsMock::read_dir
            .next_call(matching!("locked"))
            .answers(&|_, _| Err(io::Error::from(io::ErrorKind::PermissionDenied))),
    );

    assert!(fs::glob(&u, "locked/*").unwrap().is_empty());
}

#[test]
fn glob_bad_pattern() {
    let u = Unimock::new(());
    assert_eq!(
        io::ErrorKind::InvalidInput,
        fs::glob(&u, "[").unwrap_err().kind()
    );
}

#[test]
fn sub_fs_mock() {
    let u = Unimock::new((
        SubFsMock::sub
            .next_call(matching!("assets"))
            .answers(&|u, _| Ok(Box::new(u.clone()) as Box<dyn Fs>)),
        FsMock::open
            .next_call(matching!("logo.svg"))
            .answers(&|_, _| Err(io::Error::from(io::ErrorKind::NotFound))),
    ));

    let assets = u.sub("assets").unwrap();
    assert!(assets.open("logo.svg").is_err());
}

#[test]
fn dir_fs_over_temp_dir() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir(tmp.path().join("docs")).unwrap();
    std::fs::write(tmp.path().join("docs/readme.md"), b"# readme").unwrap();
    std::fs::write(tmp.path().join("top.txt"), b"top").unwrap();

    let fsys = DirFs::new(tmp.path());
    assert_eq!(tmp.path(), fsys.root());

    let names: Vec<_> = ReadDirFs::read_dir(&fsys, ".")
        .unwrap()
        .iter()
        .map(|entry| entry.name())
        .collect();
    assert_eq!(vec!["docs", "top.txt"], names);

    let info = fs::stat(&fsys, "docs").unwrap();
    assert!(info.is_dir());
    assert!(info.mode().is_dir());

    assert_eq!(vec!["docs/readme.md".to_string()], fs::glob(&fsys, "*/*.md").unwrap());
    assert_eq!(b"top".to_vec(), fs::read_file(&fsys, "top.txt").unwrap());
}
