//! 频道有效权限计算：角色权限叠加后依次应用 @everyone、角色、成员三层频道覆盖

use broadcaster_domain::ports::Permissions;

const ADMINISTRATOR: u64 = 1 << 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteKind {
    Role,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionOverwrite {
    pub id: i64,
    pub kind: OverwriteKind,
    pub allow: u64,
    pub deny: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePermissions {
    pub id: i64,
    pub permissions: u64,
}

/// 计算所需的全部输入，@everyone 角色的ID等于租户ID
#[derive(Debug, Clone, Copy)]
pub struct PermissionContext<'a> {
    pub tenant_id: i64,
    pub owner_id: i64,
    pub member_id: i64,
    pub member_role_ids: &'a [i64],
    pub roles: &'a [RolePermissions],
    pub overwrites: &'a [PermissionOverwrite],
}

pub fn compute_channel_permissions(ctx: &PermissionContext<'_>) -> Permissions {
    if ctx.member_id == ctx.owner_id {
        return Permissions::all();
    }

    let role_bits = |id: i64| {
        ctx.roles
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.permissions)
            .unwrap_or(0)
    };

    let mut bits = role_bits(ctx.tenant_id);
    for role_id in ctx.member_role_ids {
        bits |= role_bits(*role_id);
    }

    if bits & ADMINISTRATOR != 0 {
        return Permissions::all();
    }

    if let Some(everyone) = ctx
        .overwrites
        .iter()
        .find(|o| o.kind == OverwriteKind::Role && o.id == ctx.tenant_id)
    {
        bits &= !everyone.deny;
        bits |= everyone.allow;
    }

    let (allow, deny) = ctx
        .overwrites
        .iter()
        .filter(|o| o.kind == OverwriteKind::Role && ctx.member_role_ids.contains(&o.id))
        .fold((0u64, 0u64), |(allow, deny), o| (allow | o.allow, deny | o.deny));
    bits &= !deny;
    bits |= allow;

    if let Some(member) = ctx
        .overwrites
        .iter()
        .find(|o| o.kind == OverwriteKind::Member && o.id == ctx.member_id)
    {
        bits &= !member.deny;
        bits |= member.allow;
    }

    Permissions(bits)
}
