use std::io::Cursor;

use stdmock::io::{read_all, Closer, ReadCloser, Stream};
use stdmock::os::exec::*;
use stdmock::os::ProcessState;
use unimock::*;

fn current_branch(exec: &dyn Exec) -> Result<String, Error> {
    let mut cmd = exec.command("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let out = cmd.output()?;
    Ok(String::from_utf8_lossy(&out).trim().to_string())
}

fn command_self(u: &Unimock, _: &str, _: &[&str]) -> Box<dyn Cmd> {
    Box::new(u.clone()) as Box<dyn Cmd>
}

#[test]
fn mocked_command_output() {
    let u = Unimock::new((
        ExecMock::command
            .next_call(matching!("git", ["rev-parse", "--abbrev-ref", "HEAD"]))
            .answers(&command_self),
        CmdMock::output
            .next_call(matching!())
            .returns(Ok(b"main\n".to_vec())),
    ));

    assert_eq!("main", current_branch(&u).unwrap());
}

#[test]
fn mocked_command_exit_failure() {
    let u = Unimock::new((
        ExecMock::command.next_call(matching!("git", _)).answers(&command_self),
        CmdMock::output.next_call(matching!()).answers(&|_| {
            Err(Error::Exit {
                code: 128,
                stderr: b"fatal: not a git repository".to_vec(),
            })
        }),
    ));

    let err = current_branch(&u).unwrap_err();
    assert_eq!(Some(128), err.exit_code());
    assert_eq!("exit status 128", err.to_string());
}

#[test]
fn run_with_dir_and_env() {
    let u = Unimock::new((
        ExecMock::command
            .next_call(matching!("make", ["test"]))
            .answers(&command_self),
        CmdMock::set_dir.next_call(matching!("/src")).returns(()),
        CmdMock::set_env
            .next_call(matching!((env) if env.len() == 1 && env[0] == "CI=1"))
            .returns(()),
        CmdMock::run.next_call(matching!()).returns(Ok(())),
        CmdMock::process_state
            .next_call(matching!())
            .returns(Some(ProcessState::exited_with(31, 0))),
    ));

    let mut cmd = u.command("make", &["test"]);
    cmd.set_dir("/src");
    cmd.set_env(vec!["CI=1".to_string()]);
    cmd.run().unwrap();
    assert!(cmd.process_state().unwrap().success());
}

#[test]
fn start_then_wait() {
    let u = Unimock::new((
        ExecMock::command.next_call(matching!("sleep", ["1"])).answers(&command_self),
        CmdMock::start.next_call(matching!()).returns(Ok(())),
        CmdMock::start
            .next_call(matching!())
            .answers(&|_| Err(Error::AlreadyStarted)),
        CmdMock::wait.next_call(matching!()).returns(Ok(())),
    ));

    let mut cmd = u.command("sleep", &["1"]);
    cmd.start().unwrap();
    assert_eq!("exec: already started", cmd.start().unwrap_err().to_string());
    cmd.wait().unwrap();
}

#[test]
fn combined_output_with_failure() {
    let u = Unimock::new((
        ExecMock::command.next_call(matching!("lint", _)).answers(&command_self),
        CmdMock::combined_output.next_call(matching!()).answers(&|_| {
            (
                b"warning\nerror\n".to_vec(),
                Err(Error::Exit {
                    code: 1,
                    stderr: vec![],
                }),
            )
        }),
    ));

    let mut cmd = u.command("lint", &[]);
    let (output, result) = cmd.combined_output();
    assert_eq!(b"warning\nerror\n".to_vec(), output);
    assert_eq!(Some(1), result.unwrap_err().exit_code());
}

#[test]
fn stdout_pipe_streams_output() {
    let u = Unimock::new((
        ExecMock::command.next_call(matching!("ls", _)).answers(&command_self),
        CmdMock::stdout_pipe.next_call(matching!()).answers(&|_| {
            Ok(Box::new(Stream::new(Cursor::new(b"a\nb\n".to_vec())))
                as Box<dyn ReadCloser + Send + Sync>)
        }),
        CmdMock::start.next_call(matching!()).returns(Ok(())),
        CmdMock::wait.next_call(matching!()).returns(Ok(())),
    ));

    let mut cmd = u.command("ls", &["-1"]);
    let mut stdout = cmd.stdout_pipe().unwrap();
    cmd.start().unwrap();
    assert_eq!(b"a\nb\n".to_vec(), read_all(&mut stdout).unwrap());
    stdout.close().unwrap();
    cmd.wait().unwrap();
}

#[test]
fn command_description_uses_display() {
    let u = Unimock::new((
        ExecMock::command.next_call(matching!("echo", _)).answers(&command_self),
        CmdMock::path
            .next_call(matching!())
            .returns("/bin/echo".to_string()),
        CmdMock::args
            .next_call(matching!())
            .returns(vec!["echo".to_string(), "hi".to_string()]),
        unimock::mock::core::fmt::DisplayMock::fmt
            .next_call(matching!(_))
            .answers(&|_, f| write!(f, "/bin/echo hi")),
    ));

    let cmd = u.command("echo", &["hi"]);
    assert_eq!("/bin/echo", cmd.path());
    assert_eq!(vec!["echo", "hi"], cmd.args());
    assert_eq!("/bin/echo hi", cmd.to_string());
}

#[test]
fn look_path_mocked() {
    let u = Unimock::new((
        ExecMock::look_path
            .next_call(matching!("git"))
            .returns(Ok("/usr/bin/git".to_string())),
        ExecMock::look_path
            .next_call(matching!("missing"))
            .answers(&|_, file| Err(Error::NotFound(file.to_string()))),
    ));

    assert_eq!("/usr/bin/git", u.look_path("git").unwrap());
    assert_eq!(
        "exec: \"missing\": executable file not found in $PATH",
        u.look_path("missing").unwrap_err().to_string()
    );
}

#[cfg(unix)]
#[test]
fn system_exec_runs_commands() {
    let exec = SystemExec;

    let mut cmd = exec.command("sh", &["-c", "printf main"]);
    assert_eq!(b"main".to_vec(), cmd.output().unwrap());
    assert!(cmd.process_state().unwrap().success());

    let mut failing = exec.command("sh", &["-c", "exit 7"]);
    assert_eq!(Some(7), failing.run().unwrap_err().exit_code());
    assert_eq!(
        "exec: Wait was already called",
        failing.wait().unwrap_err().to_string()
    );

    assert!(matches!(
        exec.look_path("stdmock-definitely-missing"),
        Err(Error::NotFound(_))
    ));
}
