//! Resolving the image's `User` setting against its own account files

use crate::{
    errors::{ImageError, VFSError},
    filesystem::vfs::Filesystem,
};
use std::path::Path;

pub const PASSWD_PATH: &str = "/etc/passwd";
pub const GROUP_PATH: &str = "/etc/group";

/// One line of `/etc/passwd`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
}

/// One line of `/etc/group`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Identity a container process starts with
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecUser {
    pub uid: u32,
    pub gid: u32,
    pub sgids: Vec<u32>,
    pub home: String,
}

impl Default for ExecUser {
    fn default() -> Self {
        ExecUser {
            uid: 0,
            gid: 0,
            sgids: Vec::new(),
            home: "/".to_owned(),
        }
    }
}

fn account_lines(text: &str) -> impl Iterator<Item = Vec<&str>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.split(':').collect())
}

/// Malformed lines are skipped
pub fn parse_passwd(text: &str) -> Vec<PasswdEntry> {
    account_lines(text)
        .filter_map(|fields| {
            Some(PasswdEntry {
                name: fields.first()?.to_string(),
                uid: fields.get(2)?.parse().ok()?,
                gid: fields.get(3)?.parse().ok()?,
                home: fields.get(5).copied().unwrap_or("").to_owned(),
            })
        })
        .collect()
}

/// Malformed lines are skipped
pub fn parse_group(text: &str) -> Vec<GroupEntry> {
    account_lines(text)
        .filter_map(|fields| {
            Some(GroupEntry {
                name: fields.first()?.to_string(),
                gid: fields.get(2)?.parse().ok()?,
                members: fields
                    .get(3)
                    .map(|list| {
                        list.split(',')
                            .map(str::trim)
                            .filter(|member| !member.is_empty())
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// Resolve `name|uid[:group|gid]` into numeric ids
///
/// A user name must appear in `passwd`; a numeric user doesn't have to. When
/// no group is given, the primary group comes from `passwd` and every group
/// listing the user by name becomes a supplementary group.
pub fn resolve_user(
    spec: &str,
    passwd: Option<&str>,
    group: Option<&str>,
) -> Result<ExecUser, ImageError> {
    let (user_arg, group_arg) = match spec.split_once(':') {
        Some((user, group)) => (user, Some(group)),
        None => (spec, None),
    };
    let numeric_uid: Option<u32> = user_arg.parse().ok();

    let mut result = ExecUser::default();
    let mut matched_name = None;
    let users = passwd.map(parse_passwd).unwrap_or_default();
    let found = users
        .into_iter()
        .find(|entry| entry.name == user_arg || Some(entry.uid) == numeric_uid);
    match (found, numeric_uid) {
        (Some(entry), _) => {
            result.uid = entry.uid;
            result.gid = entry.gid;
            if !entry.home.is_empty() {
                result.home = entry.home;
            }
            matched_name = Some(entry.name);
        }
        (None, Some(uid)) => result.uid = uid,
        (None, None) => return Err(ImageError::UnknownUser(user_arg.to_owned())),
    }

    let groups = group.map(parse_group).unwrap_or_default();
    match group_arg {
        Some(group_arg) => {
            let numeric_gid: Option<u32> = group_arg.parse().ok();
            match groups
                .iter()
                .find(|entry| entry.name == group_arg || Some(entry.gid) == numeric_gid)
            {
                Some(entry) => result.gid = entry.gid,
                None => match numeric_gid {
                    Some(gid) => result.gid = gid,
                    None => return Err(ImageError::UnknownGroup(group_arg.to_owned())),
                },
            }
        }
        None => {
            if let Some(name) = &matched_name {
                result.sgids = groups
                    .iter()
                    .filter(|entry| entry.members.iter().any(|member| member == name))
                    .map(|entry| entry.gid)
                    .collect();
            }
        }
    }
    Ok(result)
}

async fn read_optional(fs: &Filesystem, path: &str) -> Result<Option<String>, ImageError> {
    match fs.read_file(Path::new(path)).await {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(VFSError::NotFound) => {
            log::debug!("image has no {}", path);
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Resolve a user against the account files inside an image tree
pub async fn resolve_in(fs: &Filesystem, spec: &str) -> Result<ExecUser, ImageError> {
    let passwd = read_optional(fs, PASSWD_PATH).await?;
    let group = read_optional(fs, GROUP_PATH).await?;
    resolve_user(spec, passwd.as_deref(), group.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/sh
# comment
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
broken line
www:x:33:33:www:/var/www:/usr/sbin/nologin
";

    const GROUP: &str = "\
root:x:0:
daemon:x:1:www
audio:x:29:www, daemon
wheel:x:10:root
";

    #[test]
    fn parse_files() {
        let users = parse_passwd(PASSWD);
        assert_eq!(users.len(), 3);
        assert_eq!(users[2], PasswdEntry {
            name: "www".to_owned(),
            uid: 33,
            gid: 33,
            home: "/var/www".to_owned(),
        });
        let groups = parse_group(GROUP);
        assert_eq!(groups[0].members, Vec::<String>::new());
        assert_eq!(groups[2].members, vec!["www", "daemon"]);
    }

    #[test]
    fn user_by_name() {
        let user = resolve_user("www", Some(PASSWD), Some(GROUP)).unwrap();
        assert_eq!(user, ExecUser {
            uid: 33,
            gid: 33,
            sgids: vec![1, 29],
            home: "/var/www".to_owned(),
        });
        let user = resolve_user("root", Some(PASSWD), Some(GROUP)).unwrap();
        assert_eq!(user.sgids, vec![10]);
        assert_eq!(user.home, "/root");
    }

    #[test]
    fn user_and_group() {
        let user = resolve_user("www:audio", Some(PASSWD), Some(GROUP)).unwrap();
        assert_eq!((user.uid, user.gid), (33, 29));
        assert!(user.sgids.is_empty());
        let user = resolve_user("1:77", Some(PASSWD), Some(GROUP)).unwrap();
        assert_eq!((user.uid, user.gid), (1, 77));
        assert!(matches!(
            resolve_user("www:nogroup", Some(PASSWD), Some(GROUP)),
            Err(ImageError::UnknownGroup(g)) if g == "nogroup"
        ));
    }

    #[test]
    fn numeric_user_without_files() {
        let user = resolve_user("1000", None, None).unwrap();
        assert_eq!((user.uid, user.gid), (1000, 0));
        assert_eq!(user.home, "/");
        assert!(matches!(
            resolve_user("nobody", None, None),
            Err(ImageError::UnknownUser(u)) if u == "nobody"
        ));
    }
}
