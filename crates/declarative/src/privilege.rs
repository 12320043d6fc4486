//! Privilege context for running actions as another identity
//!
//! The effective uid/gid and supplementary groups of a process are shared
//! by every thread in it. [`PrivilegeContext`] is the single owner of that
//! state: it switches identity for the duration of one action, restores it
//! on every exit path (errors and panics included), and refuses a second
//! switch while one is active.
//!
//! When the process is not running as root, or the platform has no notion
//! of effective identity, actions simply run as the current user and no
//! identity call is made at all.
//!
//! ```ignore
//! let privilege = PrivilegeContext::system()?;
//! let target = IdentityTarget::user("postgres");
//! let written = privilege.as_user(&target, || std::fs::write("/var/lib/pg/x", "y"))?;
//! ```

use crate::error::IdentityError;
use crate::types::{CommandOutput, Invocation};
use std::io::{self, Read, Seek, SeekFrom};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

/// Set while a system-backed context exists in this process
static SYSTEM_CLAIMED: AtomicBool = AtomicBool::new(false);

/// A user or group given by name or numeric id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdSpec {
    Name(String),
    Id(u32),
}

impl IdSpec {
    /// All-digit strings are ids, anything else is a name
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && let Ok(id) = s.parse()
        {
            return Self::Id(id);
        }
        Self::Name(s.to_string())
    }
}

impl std::fmt::Display for IdSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

/// The identity an action should run as
///
/// Without a group the user's primary group is used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityTarget {
    pub user: Option<IdSpec>,
    pub group: Option<IdSpec>,
}

impl IdentityTarget {
    pub fn user(user: &str) -> Self {
        Self {
            user: Some(IdSpec::parse(user)),
            group: None,
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.group = Some(IdSpec::parse(group));
        self
    }
}

impl std::fmt::Display for IdentityTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.user, &self.group) {
            (Some(user), Some(group)) => write!(f, "{user}:{group}"),
            (Some(user), None) => write!(f, "{user}"),
            (None, Some(group)) => write!(f, ":{group}"),
            (None, None) => f.write_str("(current)"),
        }
    }
}

/// A resolved identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    /// Account name, used to initialise supplementary groups
    pub user: Option<String>,
}

/// A user or group account entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub id: u32,
    /// Primary group of a user; `None` for groups
    pub primary_gid: Option<u32>,
}

/// Access to the process identity and the account database
///
/// The system implementation talks to the kernel; tests substitute a
/// recording backend.
pub trait IdentityBackend: Send + Sync {
    /// Whether this platform has effective identities to switch
    fn supports_switching(&self) -> bool;

    fn real_uid(&self) -> u32;

    fn effective_uid(&self) -> u32;

    fn effective_gid(&self) -> u32;

    fn supplementary_groups(&self) -> io::Result<Vec<u32>>;

    fn set_effective_uid(&self, uid: u32) -> io::Result<()>;

    fn set_effective_gid(&self, gid: u32) -> io::Result<()>;

    fn set_supplementary_groups(&self, groups: &[u32]) -> io::Result<()>;

    /// Set the supplementary groups from the group database
    fn init_groups(&self, user: &str, gid: u32) -> io::Result<()>;

    fn lookup_user(&self, spec: &IdSpec) -> io::Result<Option<Account>>;

    fn lookup_group(&self, spec: &IdSpec) -> io::Result<Option<Account>>;

    /// Run a command, as `identity` when given, capturing combined output
    fn spawn(&self, invocation: &Invocation, identity: Option<&Identity>)
    -> io::Result<CommandOutput>;
}

/// Identity saved before a switch
#[derive(Debug, Clone)]
struct Saved {
    uid: u32,
    gid: u32,
    groups: Vec<u32>,
}

/// Restores the saved identity when dropped
///
/// Dropping happens on unwind too, so a panicking action never leaves the
/// process under the target identity.
struct SwitchGuard<'a> {
    backend: &'a dyn IdentityBackend,
    saved: Saved,
    armed: bool,
}

impl SwitchGuard<'_> {
    /// Restore explicitly, reporting failure
    fn restore(mut self) -> Result<(), IdentityError> {
        self.armed = false;
        restore(self.backend, &self.saved)
    }
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = restore(self.backend, &self.saved)
        {
            log::error!("{e}");
        }
    }
}

/// Regain the saved user first: changing groups back needs its privileges
fn restore(backend: &dyn IdentityBackend, saved: &Saved) -> Result<(), IdentityError> {
    let err = |source| IdentityError::Restore {
        uid: saved.uid,
        gid: saved.gid,
        source,
    };
    backend.set_effective_uid(saved.uid).map_err(err)?;
    backend.set_supplementary_groups(&saved.groups).map_err(err)?;
    backend.set_effective_gid(saved.gid).map_err(err)?;
    log::trace!("restored effective identity {}:{}", saved.uid, saved.gid);
    Ok(())
}

/// Sole owner of the process identity
pub struct PrivilegeContext {
    backend: Box<dyn IdentityBackend>,
    switch_lock: Mutex<()>,
    /// Real uid at construction, fixed for the run
    real_uid: u32,
    claimed: bool,
}

impl PrivilegeContext {
    /// Context backed by the running process
    ///
    /// Only one may exist at a time; a second call fails with
    /// [`IdentityError::AlreadyClaimed`] until the first is dropped.
    pub fn system() -> Result<Self, IdentityError> {
        if SYSTEM_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(IdentityError::AlreadyClaimed);
        }
        let mut ctx = Self::with_backend(Box::new(SystemBackend));
        ctx.claimed = true;
        Ok(ctx)
    }

    /// Context over an arbitrary backend
    pub fn with_backend(backend: Box<dyn IdentityBackend>) -> Self {
        let real_uid = backend.real_uid();
        Self {
            backend,
            switch_lock: Mutex::new(()),
            real_uid,
            claimed: false,
        }
    }

    pub fn real_uid(&self) -> u32 {
        self.real_uid
    }

    /// Whether identity switches actually happen
    pub fn is_privileged(&self) -> bool {
        self.real_uid == 0 && self.backend.supports_switching()
    }

    /// Resolve a target to concrete ids
    ///
    /// Numeric ids need no account entry; names must resolve.
    pub fn resolve(&self, target: &IdentityTarget) -> Result<Identity, IdentityError> {
        let user = match &target.user {
            Some(spec) => Some(self.resolve_user(spec)?),
            None => None,
        };

        let gid = match (&target.group, &user) {
            (Some(spec), _) => self.resolve_group(spec)?,
            (None, Some((_, Some(account)))) => account
                .primary_gid
                .unwrap_or_else(|| self.backend.effective_gid()),
            (None, _) => self.backend.effective_gid(),
        };

        Ok(match user {
            Some((uid, account)) => Identity {
                uid,
                gid,
                user: account.map(|a| a.name),
            },
            None => Identity {
                uid: self.backend.effective_uid(),
                gid,
                user: None,
            },
        })
    }

    fn resolve_user(&self, spec: &IdSpec) -> Result<(u32, Option<Account>), IdentityError> {
        let account = self
            .backend
            .lookup_user(spec)
            .map_err(|source| IdentityError::Lookup {
                name: spec.to_string(),
                source,
            })?;
        match (spec, account) {
            (_, Some(account)) => Ok((account.id, Some(account))),
            (IdSpec::Id(uid), None) => Ok((*uid, None)),
            (IdSpec::Name(name), None) => Err(IdentityError::UnknownUser(name.clone())),
        }
    }

    fn resolve_group(&self, spec: &IdSpec) -> Result<u32, IdentityError> {
        let account = self
            .backend
            .lookup_group(spec)
            .map_err(|source| IdentityError::Lookup {
                name: spec.to_string(),
                source,
            })?;
        match (spec, account) {
            (_, Some(account)) => Ok(account.id),
            (IdSpec::Id(gid), None) => Ok(*gid),
            (IdSpec::Name(name), None) => Err(IdentityError::UnknownGroup(name.clone())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, IdentityError> {
        match self.switch_lock.try_lock() {
            Ok(guard) => Ok(guard),
            // A panicking action leaves the lock poisoned; the guard has
            // already restored the identity by then.
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(IdentityError::SwitchInProgress),
        }
    }

    /// Run `action` with the effective identity switched to `target`
    ///
    /// The group is switched before the user and the target's supplementary
    /// groups are initialised. The original identity is restored when the
    /// action returns or panics. The action's own result is passed through
    /// untouched; an `Err` here means the switch or the restore failed.
    pub fn as_user<T>(
        &self,
        target: &IdentityTarget,
        action: impl FnOnce() -> T,
    ) -> Result<T, IdentityError> {
        if !self.is_privileged() {
            log::trace!("not privileged, running as current user instead of {target}");
            return Ok(action());
        }

        let _lock = self.lock()?;
        let identity = self.resolve(target)?;
        let backend = self.backend.as_ref();

        let saved = Saved {
            uid: backend.effective_uid(),
            gid: backend.effective_gid(),
            groups: backend
                .supplementary_groups()
                .map_err(|source| IdentityError::Switch {
                    uid: identity.uid,
                    gid: identity.gid,
                    source,
                })?,
        };
        let guard = SwitchGuard {
            backend,
            saved,
            armed: true,
        };

        if let Err(source) = switch_to(backend, &identity) {
            guard.restore()?;
            return Err(IdentityError::Switch {
                uid: identity.uid,
                gid: identity.gid,
                source,
            });
        }
        log::debug!(
            "switched effective identity to {}:{}",
            identity.uid,
            identity.gid
        );

        let result = action();
        guard.restore()?;
        Ok(result)
    }

    /// Run an external command, capturing stdout and stderr together
    ///
    /// With a target identity and a privileged process the child is started
    /// as that identity; the parent's identity is never touched. A non-zero
    /// exit is reported in the output, not as an error.
    pub fn run_and_capture(
        &self,
        invocation: &Invocation,
        target: Option<&IdentityTarget>,
    ) -> Result<CommandOutput, IdentityError> {
        let spawn_err = |source| IdentityError::Spawn {
            program: invocation.program.clone(),
            source,
        };

        match target {
            Some(target) if self.is_privileged() => {
                let _lock = self.lock()?;
                let identity = self.resolve(target)?;
                log::debug!(
                    "running '{}' as {}:{}",
                    invocation.command_line(),
                    identity.uid,
                    identity.gid
                );
                self.backend
                    .spawn(invocation, Some(&identity))
                    .map_err(spawn_err)
            }
            _ => {
                log::debug!("running '{}'", invocation.command_line());
                self.backend.spawn(invocation, None).map_err(spawn_err)
            }
        }
    }
}

impl Drop for PrivilegeContext {
    fn drop(&mut self) {
        if self.claimed {
            SYSTEM_CLAIMED.store(false, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for PrivilegeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegeContext")
            .field("real_uid", &self.real_uid)
            .field("privileged", &self.is_privileged())
            .finish_non_exhaustive()
    }
}

fn switch_to(backend: &dyn IdentityBackend, identity: &Identity) -> io::Result<()> {
    backend.set_effective_gid(identity.gid)?;
    match &identity.user {
        Some(name) => backend.init_groups(name, identity.gid)?,
        None => backend.set_supplementary_groups(&[identity.gid])?,
    }
    backend.set_effective_uid(identity.uid)
}

/// Build a [`Command`] for an invocation
pub fn command_for(invocation: &Invocation) -> Command {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args);
    if let Some(dir) = &invocation.cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in &invocation.env {
        cmd.env(key, value);
    }
    cmd
}

/// Run a command with stdout and stderr sharing one temporary file
///
/// Returns once the command itself exits, even if a background process it
/// started still holds the output open.
pub fn capture_combined(mut cmd: Command) -> io::Result<CommandOutput> {
    let mut sink = tempfile::tempfile()?;
    cmd.stdin(Stdio::null())
        .stdout(sink.try_clone()?)
        .stderr(sink.try_clone()?);

    let status = cmd.spawn()?.wait()?;

    // Both streams share the file offset, which now sits at the end
    let mut output = Vec::new();
    sink.seek(SeekFrom::Start(0))?;
    sink.read_to_end(&mut output)?;

    Ok(CommandOutput {
        output,
        code: status.code(),
        success: status.success(),
    })
}

/// The running process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

#[cfg(unix)]
mod system {
    use super::{Account, IdSpec, Identity, IdentityBackend, SystemBackend};
    use crate::types::{CommandOutput, Invocation};
    use nix::unistd::{self, Gid, Group, Uid, User};
    use std::io;

    #[cfg(not(target_vendor = "apple"))]
    fn c_name(name: &str) -> io::Result<std::ffi::CString> {
        std::ffi::CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    impl IdentityBackend for SystemBackend {
        fn supports_switching(&self) -> bool {
            true
        }

        fn real_uid(&self) -> u32 {
            unistd::getuid().as_raw()
        }

        fn effective_uid(&self) -> u32 {
            unistd::geteuid().as_raw()
        }

        fn effective_gid(&self) -> u32 {
            unistd::getegid().as_raw()
        }

        #[cfg(not(target_vendor = "apple"))]
        fn supplementary_groups(&self) -> io::Result<Vec<u32>> {
            Ok(unistd::getgroups()?.into_iter().map(Gid::as_raw).collect())
        }

        #[cfg(target_vendor = "apple")]
        fn supplementary_groups(&self) -> io::Result<Vec<u32>> {
            Ok(Vec::new())
        }

        fn set_effective_uid(&self, uid: u32) -> io::Result<()> {
            Ok(unistd::seteuid(Uid::from_raw(uid))?)
        }

        fn set_effective_gid(&self, gid: u32) -> io::Result<()> {
            Ok(unistd::setegid(Gid::from_raw(gid))?)
        }

        #[cfg(not(target_vendor = "apple"))]
        fn set_supplementary_groups(&self, groups: &[u32]) -> io::Result<()> {
            let groups: Vec<Gid> = groups.iter().copied().map(Gid::from_raw).collect();
            Ok(unistd::setgroups(&groups)?)
        }

        // macOS resolves group membership dynamically
        #[cfg(target_vendor = "apple")]
        fn set_supplementary_groups(&self, _groups: &[u32]) -> io::Result<()> {
            Ok(())
        }

        #[cfg(not(target_vendor = "apple"))]
        fn init_groups(&self, user: &str, gid: u32) -> io::Result<()> {
            Ok(unistd::initgroups(&c_name(user)?, Gid::from_raw(gid))?)
        }

        #[cfg(target_vendor = "apple")]
        fn init_groups(&self, _user: &str, _gid: u32) -> io::Result<()> {
            Ok(())
        }

        fn lookup_user(&self, spec: &IdSpec) -> io::Result<Option<Account>> {
            let user = match spec {
                IdSpec::Name(name) => User::from_name(name)?,
                IdSpec::Id(uid) => User::from_uid(Uid::from_raw(*uid))?,
            };
            Ok(user.map(|u| Account {
                name: u.name,
                id: u.uid.as_raw(),
                primary_gid: Some(u.gid.as_raw()),
            }))
        }

        fn lookup_group(&self, spec: &IdSpec) -> io::Result<Option<Account>> {
            let group = match spec {
                IdSpec::Name(name) => Group::from_name(name)?,
                IdSpec::Id(gid) => Group::from_gid(Gid::from_raw(*gid))?,
            };
            Ok(group.map(|g| Account {
                name: g.name,
                id: g.gid.as_raw(),
                primary_gid: None,
            }))
        }

        #[cfg(not(target_vendor = "apple"))]
        fn spawn(
            &self,
            invocation: &Invocation,
            identity: Option<&Identity>,
        ) -> io::Result<CommandOutput> {
            use std::os::unix::process::CommandExt;

            let mut cmd = super::command_for(invocation);
            if let Some(identity) = identity {
                let uid = Uid::from_raw(identity.uid);
                let gid = Gid::from_raw(identity.gid);
                // Computed in the parent: the child must not allocate
                let groups = match &identity.user {
                    Some(name) => unistd::getgrouplist(&c_name(name)?, gid)?,
                    None => vec![gid],
                };
                // SAFETY: the closure only issues setgroups/setgid/setuid
                // system calls, which are async-signal-safe.
                unsafe {
                    cmd.pre_exec(move || {
                        unistd::setgroups(&groups)?;
                        unistd::setgid(gid)?;
                        unistd::setuid(uid)?;
                        Ok(())
                    });
                }
            }
            super::capture_combined(cmd)
        }

        #[cfg(target_vendor = "apple")]
        fn spawn(
            &self,
            invocation: &Invocation,
            identity: Option<&Identity>,
        ) -> io::Result<CommandOutput> {
            use std::os::unix::process::CommandExt;

            let mut cmd = super::command_for(invocation);
            if let Some(identity) = identity {
                cmd.gid(identity.gid).uid(identity.uid);
            }
            super::capture_combined(cmd)
        }
    }
}

#[cfg(not(unix))]
mod system {
    use super::{Account, IdSpec, Identity, IdentityBackend, SystemBackend};
    use crate::types::{CommandOutput, Invocation};
    use std::io;

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "effective identities are not supported on this platform",
        )
    }

    impl IdentityBackend for SystemBackend {
        fn supports_switching(&self) -> bool {
            false
        }

        fn real_uid(&self) -> u32 {
            u32::MAX
        }

        fn effective_uid(&self) -> u32 {
            u32::MAX
        }

        fn effective_gid(&self) -> u32 {
            u32::MAX
        }

        fn supplementary_groups(&self) -> io::Result<Vec<u32>> {
            Ok(Vec::new())
        }

        fn set_effective_uid(&self, _uid: u32) -> io::Result<()> {
            Err(unsupported())
        }

        fn set_effective_gid(&self, _gid: u32) -> io::Result<()> {
            Err(unsupported())
        }

        fn set_supplementary_groups(&self, _groups: &[u32]) -> io::Result<()> {
            Err(unsupported())
        }

        fn init_groups(&self, _user: &str, _gid: u32) -> io::Result<()> {
            Err(unsupported())
        }

        fn lookup_user(&self, _spec: &IdSpec) -> io::Result<Option<Account>> {
            Ok(None)
        }

        fn lookup_group(&self, _spec: &IdSpec) -> io::Result<Option<Account>> {
            Ok(None)
        }

        fn spawn(
            &self,
            invocation: &Invocation,
            _identity: Option<&Identity>,
        ) -> io::Result<CommandOutput> {
            super::capture_combined(super::command_for(invocation))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    fn root_context() -> (PrivilegeContext, MockBackend) {
        let backend = MockBackend::root();
        (
            PrivilegeContext::with_backend(Box::new(backend.clone())),
            backend,
        )
    }

    #[test]
    fn test_parse_id_spec() {
        assert_eq!(IdSpec::parse("1001"), IdSpec::Id(1001));
        assert_eq!(IdSpec::parse("bob"), IdSpec::Name("bob".into()));
        assert_eq!(IdSpec::parse("1001a"), IdSpec::Name("1001a".into()));
        assert_eq!(IdSpec::parse("99999999999"), IdSpec::Name("99999999999".into()));
    }

    #[test]
    fn test_switch_order_and_restore() {
        let (ctx, backend) = root_context();
        let value = ctx
            .as_user(&IdentityTarget::user("bob"), || backend.current())
            .unwrap();

        assert_eq!(value, (1001, 1001));
        assert_eq!(backend.current(), (0, 0));
        assert_eq!(
            backend.calls(),
            vec![
                "setegid 1001",
                "initgroups bob 1001",
                "seteuid 1001",
                "seteuid 0",
                "setgroups 0",
                "setegid 0",
            ]
        );
    }

    #[test]
    fn test_explicit_group_overrides_primary() {
        let (ctx, backend) = root_context();
        let target = IdentityTarget::user("bob").with_group("staff");
        ctx.as_user(&target, || ()).unwrap();
        assert_eq!(backend.calls()[0], "setegid 50");
    }

    #[test]
    fn test_restores_when_action_fails() {
        let (ctx, backend) = root_context();
        let result: Result<anyhow::Result<()>, _> =
            ctx.as_user(&IdentityTarget::user("bob"), || anyhow::bail!("provider failed"));

        assert!(result.unwrap().is_err());
        assert_eq!(backend.current(), (0, 0));
    }

    #[test]
    fn test_restores_when_action_panics() {
        let (ctx, backend) = root_context();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.as_user(&IdentityTarget::user("bob"), || panic!("boom"))
        }));

        assert!(outcome.is_err());
        assert_eq!(backend.current(), (0, 0));
        // the poisoned lock does not block later switches
        assert!(ctx.as_user(&IdentityTarget::user("bob"), || ()).is_ok());
    }

    #[test]
    fn test_unprivileged_makes_no_identity_calls() {
        let backend = MockBackend::unprivileged(1000);
        let ctx = PrivilegeContext::with_backend(Box::new(backend.clone()));

        let ran = ctx.as_user(&IdentityTarget::user("bob"), || true).unwrap();
        assert!(ran);
        assert!(backend.calls().is_empty());
        assert!(!ctx.is_privileged());
    }

    #[test]
    fn test_unknown_user_does_not_switch() {
        let (ctx, backend) = root_context();
        let mut ran = false;
        let err = ctx
            .as_user(&IdentityTarget::user("nobody2"), || ran = true)
            .unwrap_err();

        assert!(matches!(err, IdentityError::UnknownUser(ref name) if name == "nobody2"));
        assert!(err.is_resolution());
        assert!(!ran);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_unknown_group_does_not_switch() {
        let (ctx, backend) = root_context();
        let mut ran = false;
        let err = ctx
            .as_user(&IdentityTarget::user("bob").with_group("nogroup2"), || {
                ran = true;
            })
            .unwrap_err();

        assert!(matches!(err, IdentityError::UnknownGroup(ref name) if name == "nogroup2"));
        assert!(err.is_resolution());
        assert!(!ran);
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_numeric_ids_need_no_account() {
        let (ctx, _backend) = root_context();
        let identity = ctx
            .resolve(&IdentityTarget::user("4242").with_group("4343"))
            .unwrap();
        assert_eq!(
            identity,
            Identity {
                uid: 4242,
                gid: 4343,
                user: None
            }
        );
    }

    #[test]
    fn test_failed_switch_restores() {
        let backend = MockBackend::root().fail_on("seteuid 1001");
        let ctx = PrivilegeContext::with_backend(Box::new(backend.clone()));

        let err = ctx
            .as_user(&IdentityTarget::user("bob"), || ())
            .unwrap_err();
        assert!(matches!(err, IdentityError::Switch { uid: 1001, .. }));
        assert_eq!(backend.current(), (0, 0));
    }

    #[test]
    fn test_nested_switch_is_rejected() {
        let (ctx, _backend) = root_context();
        let inner = ctx
            .as_user(&IdentityTarget::user("bob"), || {
                ctx.as_user(&IdentityTarget::user("bob"), || ())
            })
            .unwrap();
        assert!(matches!(inner, Err(IdentityError::SwitchInProgress)));
    }

    #[test]
    fn test_run_and_capture_spawns_as_identity() {
        let (ctx, backend) = root_context();
        let inv = Invocation::new("id").arg("-u");
        ctx.run_and_capture(&inv, Some(&IdentityTarget::user("bob")))
            .unwrap();
        assert_eq!(backend.calls(), vec!["spawn id as 1001:1001"]);
        // the parent identity is never switched
        assert_eq!(backend.current(), (0, 0));
    }

    #[test]
    fn test_run_and_capture_unprivileged_ignores_identity() {
        let backend = MockBackend::unprivileged(1000);
        let ctx = PrivilegeContext::with_backend(Box::new(backend.clone()));
        ctx.run_and_capture(&Invocation::new("true"), Some(&IdentityTarget::user("bob")))
            .unwrap();
        assert_eq!(backend.calls(), vec!["spawn true"]);
    }

    #[test]
    fn test_system_context_is_exclusive() {
        let first = PrivilegeContext::system().unwrap();
        assert!(matches!(
            PrivilegeContext::system(),
            Err(IdentityError::AlreadyClaimed)
        ));
        drop(first);
        assert!(PrivilegeContext::system().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_combines_streams() {
        let inv = Invocation::new("/bin/sh")
            .arg("-c")
            .arg("echo out; echo err >&2; exit 3");
        let output = capture_combined(command_for(&inv)).unwrap();
        let text = output.output_str();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
        assert_eq!(output.code, Some(3));
        assert!(!output.success);
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_returns_when_command_exits() {
        let inv = Invocation::new("/bin/sh")
            .arg("-c")
            .arg("sleep 5 & echo started");
        let started = std::time::Instant::now();
        let output = capture_combined(command_for(&inv)).unwrap();

        assert!(started.elapsed() < std::time::Duration::from_secs(3));
        assert_eq!(output.output_str(), "started\n");
        assert_eq!(output.code, Some(0));
    }
}
