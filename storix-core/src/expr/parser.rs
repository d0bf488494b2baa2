use arcstr::ArcStr;
use combine::{
    EasyParser, ParseError, Parser, RangeStream, any, attempt, choice, eof, none_of,
    sep_by, skip_many1,
    parser::{
        char::spaces,
        combinator::recognize,
        range::{take_while, take_while1},
    },
    stream::{Range, position},
    token,
};
use compact_str::CompactString;

fn sptoken<I>(t: char) -> impl Parser<I, Output = char>
where
    I: RangeStream<Token = char>,
    I::Error: ParseError<I::Token, I::Range, I::Position>,
    I::Range: Range,
{
    spaces().with(token(t))
}

fn ident<I>() -> impl Parser<I, Output = ArcStr>
where
    I: RangeStream<Token = char>,
    I::Error: ParseError<I::Token, I::Range, I::Position>,
    I::Range: Range,
{
    recognize((
        take_while1(|c: char| c.is_alphabetic() || c == '_' || c == '$'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '$'),
    ))
    .map(|s: CompactString| ArcStr::from(s.as_str()))
}

// The raw text of one argument, everything up to an unescaped `,` or
// `)`. A backslash escapes the following character, the pair is kept
// and unescaping happens during classification.
fn arg_text<I>() -> impl Parser<I, Output = CompactString>
where
    I: RangeStream<Token = char>,
    I::Error: ParseError<I::Token, I::Range, I::Position>,
    I::Range: Range,
{
    recognize(skip_many1(choice((
        attempt((token('\\'), any()).map(|_| ())),
        none_of([',', ')']).map(|_| ()),
    ))))
}

fn signature<I>() -> impl Parser<I, Output = (ArcStr, Vec<CompactString>)>
where
    I: RangeStream<Token = char>,
    I::Error: ParseError<I::Token, I::Range, I::Position>,
    I::Range: Range,
{
    (
        spaces().with(ident()),
        sptoken('('),
        sep_by(arg_text(), token(',')),
        sptoken(')'),
    )
        .map(|(method, _, args, _): (_, _, Vec<CompactString>, _)| (method, args))
}

pub(super) fn parse_signature(s: &str) -> anyhow::Result<(ArcStr, Vec<CompactString>)> {
    signature()
        .skip(spaces())
        .skip(eof())
        .easy_parse(position::Stream::new(s))
        .map(|(r, _)| r)
        .map_err(|e| anyhow::anyhow!(format!("{e}")))
}

#[cfg(test)]
mod test {
    use crate::expr::{Arg, Literal, MalformedExpression, parse};

    fn path(a: &Arg) -> &crate::expr::PathArg {
        match a {
            Arg::Path(p) => p,
            Arg::Literal(_) => panic!("expected path arg, got {a:?}"),
        }
    }

    #[test]
    fn simple_args() {
        let s = parse("_computeFullName(firstName, lastName)").unwrap();
        assert_eq!(&*s.method, "_computeFullName");
        assert_eq!(s.args.len(), 2);
        assert!(!s.static_fn);
        let a = path(&s.args[0]);
        assert_eq!(&*a.name, "firstName");
        assert_eq!(&*a.root, "firstName");
        assert!(!a.structured && !a.wildcard);
    }

    #[test]
    fn structured_and_wildcard_args() {
        let s = parse("m(a.b.c, d.*, e.f.*)").unwrap();
        let a = path(&s.args[0]);
        assert_eq!(&*a.name, "a.b.c");
        assert_eq!(&*a.root, "a");
        assert!(a.structured && !a.wildcard);
        let d = path(&s.args[1]);
        assert_eq!(&*d.name, "d");
        assert_eq!(&*d.root, "d");
        assert!(d.structured && d.wildcard);
        let e = path(&s.args[2]);
        assert_eq!(&*e.name, "e.f");
        assert_eq!(&*e.root, "e");
        assert!(e.structured && e.wildcard);
    }

    #[test]
    fn literals() {
        let s = parse("m('hi', \"there\", 3, -2.5, 007)").unwrap();
        assert!(s.static_fn);
        assert_eq!(s.args[0], Arg::Literal(Literal::Str("hi".into())));
        assert_eq!(s.args[1], Arg::Literal(Literal::Str("there".into())));
        assert_eq!(s.args[2], Arg::Literal(Literal::Num(3.)));
        assert_eq!(s.args[3], Arg::Literal(Literal::Num(-2.5)));
        assert_eq!(s.args[4], Arg::Literal(Literal::Num(7.)));
    }

    #[test]
    fn escaped_commas() {
        let s = parse(r"m('a\,b', c\,d)").unwrap();
        assert_eq!(s.args.len(), 2);
        assert_eq!(s.args[0], Arg::Literal(Literal::Str("a,b".into())));
        assert_eq!(&*path(&s.args[1]).name, "c,d");
    }

    #[test]
    fn no_args() {
        let s = parse("tick()").unwrap();
        assert_eq!(s.args.len(), 0);
        assert!(s.static_fn);
    }

    #[test]
    fn unparseable_numbers_are_nan() {
        let s = parse("m(3px)").unwrap();
        match &s.args[0] {
            Arg::Literal(Literal::Num(n)) => assert!(n.is_nan()),
            a => panic!("expected NaN literal, got {a:?}"),
        }
    }

    #[test]
    fn malformed() {
        for e in ["m(", "m(a", "(a)", "m a)", "", "m(a))", "m(a,)"] {
            let err = parse(e).unwrap_err();
            assert!(
                err.downcast_ref::<MalformedExpression>().is_some(),
                "{e} should be malformed"
            );
        }
    }
}
