//! The regular backend.
//!
//! A performance slot for grammars that need no stack: compile verifies
//! the combinator graph is recursion-free (such a grammar denotes a finite,
//! hence regular, language) and then drives the shared LALR machinery.
//! Grammars with cycles are rejected with
//! [`CompileError::GrammarNotRegular`]; recursion belongs to the LL(k),
//! LALR, GLR, or packrat backends.

use std::sync::Arc;

use crate::backend::lalr::table::{self, ConflictPolicy};
use crate::backend::lalr::{self, LalrState};
use crate::backend::{
    find_cycle, Backend, BackendCapabilities, BackendId, Compiled, CompileOptions, Parse,
};
use crate::cfg::desugar;
use crate::error::{CompileError, ParseError};
use crate::grammar::Grammar;
use crate::tree::ParseArena;

/// The regular backend.
pub struct RegularBackend;

impl Backend for RegularBackend {
    fn id(&self) -> BackendId {
        BackendId::Regular
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "regular",
            supports_left_recursion: false,
            supports_ambiguity: false,
            supports_peg_lookahead: false,
            max_lookahead: Some(1),
        }
    }

    fn compile(
        &self,
        grammar: &Grammar,
        _options: &CompileOptions,
    ) -> Result<Compiled, CompileError> {
        if let Some(node) = find_cycle(grammar) {
            return Err(CompileError::GrammarNotRegular { node });
        }
        let cfg = Arc::new(desugar::lower(grammar)?);
        let table = table::build(&cfg, ConflictPolicy::Reject)?;
        Ok(Compiled {
            backend: BackendId::Regular,
            state: Box::new(LalrState {
                cfg: cfg.clone(),
                table,
            }),
            cfg: Some(cfg),
        })
    }

    fn parse<'a>(
        &self,
        compiled: &Compiled,
        grammar: &Grammar,
        arena: &'a ParseArena,
        input: &'a [u8],
    ) -> Result<Parse<'a>, ParseError> {
        let state = compiled
            .state
            .downcast_ref::<LalrState>()
            .expect("regular backend state attached by compile");
        lalr::drive(&state.cfg, &state.table, grammar, arena, input)
    }
}
