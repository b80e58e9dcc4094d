//! Cross-crate tests for SkillBoard live under `tests/`.
