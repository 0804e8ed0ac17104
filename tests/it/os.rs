use std::io;

use stdmock::io::fs::FileInfoMock;
use stdmock::io::{
    Closer, CloserMock, Seeker, SeekerMock, StringWriter, StringWriterMock, Writer, WriterMock,
};
use stdmock::os::*;
use unimock::*;

fn file_handle(u: &Unimock, _: &str) -> io::Result<Box<dyn File>> {
    Ok(Box::new(u.clone()) as Box<dyn File>)
}

/// Writes a report file the way application code would: create, write, sync, close.
fn save_report(os: &dyn Os, name: &str, body: &str) -> io::Result<()> {
    let mut file = os.create(name)?;
    file.write_string(body)?;
    file.sync()?;
    file.close()
}

#[test]
fn create_write_sync_close() {
    let u = Unimock::new((
        OsMock::create
            .next_call(matching!("/tmp/report.txt"))
            .answers(&file_handle),
        StringWriterMock::write_string
            .next_call(matching!("ok\n"))
            .returns(Ok(3)),
        FileMock::sync.next_call(matching!()).returns(Ok(())),
        CloserMock::close.next_call(matching!()).returns(Ok(())),
    ));

    save_report(&u, "/tmp/report.txt", "ok\n").unwrap();
}

#[test]
fn create_permission_denied() {
    let u = Unimock::new(
        OsMock::create
            .next_call(matching!(_))
            .answers(&|_, _| Err(io::Error::from(io::ErrorKind::PermissionDenied))),
    );

    let err = save_report(&u, "/etc/report.txt", "x").unwrap_err();
    assert_eq!(io::ErrorKind::PermissionDenied, err.kind());
}

#[test]
fn open_file_with_options() {
    let u = Unimock::new((
        OsMock::open_file
            .next_call(matching!("app.log", OpenOptions { append: true, .. }))
            .answers(&|u, _, _| Ok(Box::new(u.clone()) as Box<dyn File>)),
        WriterMock::write
            .next_call(matching!((buf) if *buf == b"line\n"))
            .returns(Ok(5)),
        SeekerMock::seek.next_call(matching!(_)).returns(Ok(5)),
        FileMock::truncate.next_call(matching!(0)).returns(Ok(())),
        FileMock::name
            .next_call(matching!())
            .returns("app.log".to_string()),
        CloserMock::close.next_call(matching!()).returns(Ok(())),
    ));

    let mut file = u.open_file("app.log", OpenOptions::append().perm(0o600)).unwrap();
    assert_eq!(5, file.write(b"line\n").unwrap());
    assert_eq!(5, file.seek(io::SeekFrom::End(0)).unwrap());
    file.truncate(0).unwrap();
    assert_eq!("app.log", file.name());
    file.close().unwrap();
}

#[test]
fn stat_through_open_file() {
    let u = Unimock::new((
        OsMock::open.next_call(matching!("f")).answers(&file_handle),
        FileMock::stat.next_call(matching!()).answers(&|_| {
            Ok(Box::new(Unimock::new(
                FileInfoMock::size.next_call(matching!()).returns(7u64),
            )) as Box<dyn FileInfo>)
        }),
    ));

    let file = u.open("f").unwrap();
    assert_eq!(7, file.stat().unwrap().size());
}

#[test]
fn file_system_operations() {
    let u = Unimock::new((
        OsMock::mkdir_all
            .next_call(matching!("/data/a/b", 0o755))
            .returns(Ok(())),
        OsMock::write_file
            .next_call(matching!(("/data/a/b/x", data, 0o644) if *data == b"payload"))
            .returns(Ok(())),
        OsMock::read_file
            .next_call(matching!("/data/a/b/x"))
            .returns(Ok(b"payload".to_vec())),
        OsMock::rename
            .next_call(matching!("/data/a/b/x", "/data/a/b/y"))
            .returns(Ok(())),
        OsMock::remove
            .next_call(matching!("/data/a/b/x"))
            .answers(&|_, _| Err(io::Error::from(io::ErrorKind::NotFound))),
        OsMock::remove_all.next_call(matching!("/data")).returns(Ok(())),
    ));

    u.mkdir_all("/data/a/b", 0o755).unwrap();
    u.write_file("/data/a/b/x", b"payload", 0o644).unwrap();
    assert_eq!(b"payload".to_vec(), u.read_file("/data/a/b/x").unwrap());
    u.rename("/data/a/b/x", "/data/a/b/y").unwrap();
    assert!(u.remove("/data/a/b/x").is_err());
    u.remove_all("/data").unwrap();
}

#[test]
fn environment_variables() {
    let u = Unimock::new((
        OsMock::getenv
            .each_call(matching!("HOME"))
            .returns("/home/gopher".to_string()),
        OsMock::getenv
            .each_call(matching!(_))
            .returns(String::new()),
        OsMock::lookup_env
            .each_call(matching!("EMPTY"))
            .returns(Some(String::new())),
        OsMock::lookup_env
            .each_call(matching!(_))
            .returns(None::<String>),
        OsMock::setenv.next_call(matching!("K", "V")).returns(Ok(())),
        OsMock::environ
            .next_call(matching!())
            .returns(vec!["K=V".to_string()]),
    ));

    assert_eq!("/home/gopher", u.getenv("HOME"));
    assert_eq!("", u.getenv("UNSET"));
    assert_eq!(Some(String::new()), u.lookup_env("EMPTY"));
    assert_eq!(None, u.lookup_env("UNSET"));
    u.setenv("K", "V").unwrap();
    assert_eq!(vec!["K=V".to_string()], u.environ());
}

#[test]
fn directories_and_identity() {
    let u = Unimock::new((
        OsMock::getwd
            .next_call(matching!())
            .returns(Ok("/work".to_string())),
        OsMock::chdir.next_call(matching!("/tmp")).returns(Ok(())),
        OsMock::temp_dir.next_call(matching!()).returns("/tmp".to_string()),
        OsMock::user_home_dir
            .next_call(matching!())
            .answers(&|_| Err(io::Error::new(io::ErrorKind::NotFound, "$HOME is not defined"))),
        OsMock::hostname
            .next_call(matching!())
            .returns(Ok("build-01".to_string())),
        OsMock::getpid.next_call(matching!()).returns(4242u32),
        OsMock::getppid.next_call(matching!()).returns(1u32),
    ));

    assert_eq!("/work", u.getwd().unwrap());
    u.chdir("/tmp").unwrap();
    assert_eq!("/tmp", u.temp_dir());
    assert_eq!("$HOME is not defined", u.user_home_dir().unwrap_err().to_string());
    assert_eq!("build-01", u.hostname().unwrap());
    assert_eq!(4242, u.getpid());
    assert_eq!(1, u.getppid());
}

#[test]
fn start_and_signal_process() {
    let u = Unimock::new((
        OsMock::start_process
            .next_call(matching!("worker", ["worker", "--once"], _))
            .answers(&|u, _, _, _| Ok(Box::new(u.clone()) as Box<dyn Process>)),
        ProcessMock::pid.each_call(matching!()).returns(99u32),
        ProcessMock::signal
            .next_call(matching!(Signal::Terminate))
            .returns(Ok(())),
        ProcessMock::wait
            .next_call(matching!())
            .returns(Ok(ProcessState {
                pid: 99,
                exit_code: None,
                signal: Some(Signal::Terminate.number()),
            })),
    ));

    let mut process = u
        .start_process("worker", &["worker", "--once"], ProcAttr::default())
        .unwrap();
    assert_eq!(99, process.pid());
    process.signal(Signal::Terminate).unwrap();

    let state = process.wait().unwrap();
    assert!(!state.exited());
    assert_eq!(-1, state.exit_code());
    assert_eq!("signal: terminated", state.to_string());
}

#[test]
fn kill_failure() {
    let mut u = Unimock::new(
        ProcessMock::kill
            .next_call(matching!())
            .answers(&|_| Err(io::Error::other("os: process already finished"))),
    );

    assert_eq!("os: process already finished", u.kill().unwrap_err().to_string());
}

#[test]
fn system_os_round_trip_on_temp_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_string_lossy().into_owned();
    let name = format!("{root}/report.txt");

    save_report(&SystemOs, &name, "all good\n").unwrap();
    assert_eq!(b"all good\n".to_vec(), SystemOs.read_file(&name).unwrap());

    let info = Os::stat(&SystemOs, &name).unwrap();
    assert_eq!("report.txt", info.name());
    assert_eq!(9, info.size());

    let err = SystemOs.open(&format!("{root}/missing")).err().unwrap();
    assert_eq!(io::ErrorKind::NotFound, err.kind());
    assert!(err.to_string().starts_with("open "));
}
