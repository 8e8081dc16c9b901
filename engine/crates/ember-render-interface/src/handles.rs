//! 各个管理器对外分发的整数 id
//!
//! 所有 id 都是 `Copy` 的 newtype，`INVALID` 作为哨兵值，不会被分配给新加载的资源

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        define_id!($(#[$meta])* $name, u32::MAX);
    };
    ($(#[$meta:meta])* $name:ident, $invalid:expr) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
        impl $name {
            pub const INVALID: Self = Self($invalid);

            #[inline]
            pub fn is_valid(&self) -> bool {
                *self != Self::INVALID
            }

            #[inline]
            pub fn index(&self) -> usize {
                self.0 as usize
            }
        }
        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.is_valid() { write!(f, "{}({})", stringify!($name), self.0) } else { write!(f, "{}(invalid)", stringify!($name)) }
            }
        }
    };
}

define_id!(
    /// 一个已加载的 mesh，可能包含多个 submesh
    MeshId
);
define_id!(
    /// submesh 的全局编号，也是 draw command 查找表的下标
    SubMeshId
);
define_id!(
    /// material 数组中的 slot
    MaterialId
);
define_id!(
    /// bindless texture 数组中的 slot；INVALID 指向品红色的占位贴图
    TextureId,
    5
);
define_id!(
    /// 光源的身份，从 1 开始单调递增
    LightId
);

impl TextureId {
    pub const WHITE: Self = Self(0);
    pub const GRAY: Self = Self(1);
    pub const NORMAL: Self = Self(2);
    pub const BLACK: Self = Self(3);
    pub const METALNESS: Self = Self(4);

    pub const PLACEHOLDER_COUNT: u32 = 6;

    #[inline]
    pub fn is_placeholder(&self) -> bool {
        self.0 < Self::PLACEHOLDER_COUNT
    }
}

impl MaterialId {
    /// 永不释放的默认材质
    pub const DEFAULT: Self = Self(0);

    /// 无效的 id 使用默认材质绘制
    #[inline]
    pub fn or_default(self) -> Self {
        if self.is_valid() { self } else { Self::DEFAULT }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_sentinel() {
        assert!(!MeshId::INVALID.is_valid());
        assert!(MeshId(0).is_valid());
        assert_eq!(MeshId::default(), MeshId::INVALID);
    }

    #[test]
    fn test_material_fallback() {
        assert_eq!(MaterialId::INVALID.or_default(), MaterialId::DEFAULT);
        assert_eq!(MaterialId(7).or_default(), MaterialId(7));
    }

    #[test]
    fn test_placeholder_range() {
        assert!(TextureId::INVALID.is_placeholder());
        assert!(!TextureId(TextureId::PLACEHOLDER_COUNT).is_placeholder());
        assert_eq!(TextureId::default(), TextureId(5));
    }
}
